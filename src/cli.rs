use clap::Parser;

use crate::constants::DEFAULT_LISTEN_ADDR;

/// Command-line arguments for rs-dumper.
///
/// Backup settings (secret id, bucket, region, endpoints, root) come from the
/// environment; see [`crate::config::BackupConfig`]. The command line only
/// controls the HTTP front end and logging.
#[derive(Parser, Debug)]
#[clap(name = "rs-dumper", about = "HTTP-triggered filesystem dump to S3-compatible storage")]
pub struct Args {
    /// Address to listen on, host:port (default: 0.0.0.0:$PORT or 0.0.0.0:8080)
    #[clap(short, long)]
    pub listen: Option<String>,

    /// Port to listen on when --listen is not given
    #[clap(long, env = "PORT")]
    pub port: Option<u16>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Effective listen address
    pub fn listen_addr(&self) -> String {
        match (&self.listen, self.port) {
            (Some(listen), _) => listen.clone(),
            (None, Some(port)) => format!("0.0.0.0:{}", port),
            (None, None) => DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}
