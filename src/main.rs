// src/main.rs

use crm_file_events::{cli, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run(cli::parse()).await {
        eprintln!("crm-file-events error: {err:?}");
        std::process::exit(1);
    }
}
