//! pyro: Pyro server with a line console
//!
//! Starts a server from an optional JSON config, then reads lines from
//! stdin. Lines run locally as Rho scripts, or are forwarded verbatim to
//! the remote entered with `enter()`/`join()` until `leave` is typed.

use anyhow::{Context as _, Result};
use pyro_core::{Context, Exec, Language};
use pyro_net::{Server, ServerConfig};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Worker stack size; nested invocations recurse through poll
const THREAD_STACK_SIZE: usize = 8 * 1024 * 1024;

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_stack_size(THREAD_STACK_SIZE)
        .build()
        .context("Failed to build runtime")?
        .block_on(run())
}

async fn run() -> Result<()> {
    // Config from the first argument, else PYRO_CONFIG, else defaults
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::from_env()?,
    };

    let server = Server::new(config)?;
    let addr = server.start().await?;
    info!("Pyro console ready on {}, Ctrl-D to quit", addr);

    let mut console = Console::new(server.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        println!("{}", console.line(line).await);
    }

    server.stop();
    server.peer().close_all();
    Ok(())
}

/// Local Exec plus forwarding to the entered remote
struct Console {
    server: Arc<Server>,
    context: Context,
    exec: Exec,
}

impl Console {
    fn new(server: Arc<Server>) -> Self {
        let context = Context::with_language(server.registry().clone(), Language::Rho);
        let exec = server.new_exec();
        Self {
            server,
            context,
            exec,
        }
    }

    async fn line(&mut self, line: &str) -> String {
        let peer = self.server.peer();
        if let Some(id) = peer.entered() {
            if line == "leave" || line == "leave()" {
                peer.leave();
                return format!("left {}", id);
            }
            return match peer.request(id, line).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Request to {} failed: {}", id, e);
                    format!("Error: {}", e)
                }
            };
        }

        match self.context.translate(line, self.exec.scope()) {
            Ok(script) => {
                if let Err(e) = self.exec.run(&script.unwrap_single()).await {
                    warn!("{}", e);
                }
            }
            Err(e) => return format!("Error: {}", e),
        }
        self.server.registry().to_script(self.exec.data_stack())
    }
}
