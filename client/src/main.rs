mod command;
mod render;

use clap::Parser;
use command::{Action, HELP, Session};
use log::{debug, error};
use rustyline::{Editor, error::ReadlineError};
use shared::{Envelope, FrameBuffer, MESSAGE_SIZE, ProtocolError};
use std::{
    io::{self, Read, Write},
    net::TcpStream,
    thread,
};
use thiserror::Error;

/// Client for the multi-room chat relay
#[derive(Debug, Parser)]
#[command(name = "client", version)]
struct Args {
    /// Nickname to register with
    nickname: String,

    /// Channel to join on connect
    channel: String,

    /// Server host
    #[arg(long, default_value = shared::DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
}

#[derive(Debug, Error)]
enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("input error: {0}")]
    Readline(#[from] ReadlineError),
}

#[quit::main]
fn main() {
    env_logger::init();
    let args = Args::parse();

    // Connect to the server
    let hostname = format!("{}:{}", args.host, args.port);
    let reader = TcpStream::connect(&hostname).unwrap_or_else(|err| {
        println!("Failed to connect to {hostname}: {err}");
        quit::with_code(1);
    });
    let mut writer = reader.try_clone().unwrap_or_else(|err| {
        println!("Failed to clone stream: {err}");
        quit::with_code(1);
    });

    let session = Session::new(args.nickname, args.channel);
    if let Err(err) = send(&mut writer, &session.hello()) {
        println!("Failed to register: {err}");
        quit::with_code(1);
    }

    let recv_thread = thread::spawn(move || recv_handler(reader));

    if let Err(err) = send_handler(writer, session) {
        error!("{err}");
    }

    // The server closes the connection after QUIT
    let _ = recv_thread.join();
}

fn send(writer: &mut TcpStream, envelope: &Envelope) -> Result<(), ClientError> {
    writer.write_all(&shared::encode(envelope)?)?;
    Ok(())
}

fn send_handler(mut writer: TcpStream, mut session: Session) -> Result<(), ClientError> {
    let mut editor = Editor::<()>::new();

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => {
                send(&mut writer, &Envelope::Quit)?;
                return Err(err.into());
            }
        };
        editor.add_history_entry(line.as_str());

        match session.interpret(&line) {
            Ok(Action::Send(envelope)) => {
                debug!("Sending {:?}", envelope.opcode());
                send(&mut writer, &envelope)?;
            }
            Ok(Action::Show(text)) => println!("{text}"),
            Ok(Action::Quit) => break,
            Ok(Action::Nothing) => {}
            Err(err) => println!("{err}\n{HELP}"),
        }
    }

    send(&mut writer, &Envelope::Quit)
}

fn recv_handler(mut reader: TcpStream) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0; MESSAGE_SIZE];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => {
                println!("\rServer closed the connection.");
                break;
            }
            Ok(n) => frames.extend(&chunk[..n]),
            Err(err) => {
                println!("\rConnection lost: {err}");
                break;
            }
        }

        loop {
            match frames.next_envelope() {
                Ok(Some(envelope)) => {
                    print!("\r"); // Clear the prompt before printing
                    println!("{}", render::render(&envelope));
                }
                Ok(None) => break,
                Err(err) => {
                    error!("{}", ClientError::from(err));
                    return;
                }
            }
        }
        print!("> ");
        let _ = io::stdout().flush();
    }
}
