use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "comment-server", about = "JSON file backed comment service")]
pub struct Cli {
    /// Listening port.
    #[arg(long, default_value_t = 3000, env = "PORT")]
    pub port: u16,

    /// Listening host.
    #[arg(long, default_value = "localhost", env = "HOST")]
    pub host: String,

    /// Path of the JSON data file holding all comments.
    #[arg(long, default_value = "./data/comments.json", env = "DATA_FILE")]
    pub data_file: PathBuf,

    /// Directory of static assets served next to the API.
    #[arg(long, env = "PUBLIC_DIR")]
    pub public_dir: Option<PathBuf>,
}

impl Cli {
    /// `host:port` to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
