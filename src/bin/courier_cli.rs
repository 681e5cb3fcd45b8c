use std::{error::Error, io};

use clap::Parser;
use courier::{
    Command, ConsoleProgress, TransferClient,
    command::{CommandError, HELP},
    prompt,
};

#[derive(Parser)]
#[command(version, about = "Interactive Courier client", long_about = None)]
struct Cli {
    /// Server address, e.g. 127.0.0.1:9000
    address: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let mut client = TransferClient::new(cli.address.as_str())?;
    let stdin = io::stdin();

    loop {
        let cmd = match prompt(stdin.lock(), io::stdout().lock()) {
            Ok(cmd) => cmd,
            Err(CommandError::Empty) => continue,
            Err(CommandError::Io(e)) => return Err(e.into()),
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Help => println!("{HELP}"),
            Command::List => match client.list_files() {
                Ok(files) if files.is_empty() => println!("(no files)"),
                Ok(files) => files.iter().for_each(|name| println!("{name}")),
                Err(e) => eprintln!("list failed: {e}"),
            },
            Command::Upload(path) => {
                let mut sink = ConsoleProgress::new(path.display().to_string(), io::stderr());
                // The sink already reported the outcome.
                let _ = client.upload_file(&path, &mut sink);
            }
            Command::Download { name, dir } => {
                let dir = Command::download_dir(&dir);
                let mut sink = ConsoleProgress::new(name.as_str(), io::stderr());
                if let Ok(path) = client.download_file(&name, &dir, &mut sink) {
                    println!("saved to {}", path.display());
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}
