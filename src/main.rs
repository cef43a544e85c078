//! OwnerGuard daemon
//!
//! On the ESP32-S3 this is the device firmware: UART link, flash key
//! partition, TRNG noise, BOOT button as the presence gesture.
//!
//! On a host it serves the same protocol over a Unix socket from a key
//! region snapshot file, for bring-up and host-side integration testing.

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    ownerguard::platform::esp::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    host::run()
}

#[cfg(not(target_os = "espidf"))]
mod host {
    use std::path::PathBuf;

    use clap::Parser;
    use log::{info, warn};

    use ownerguard::platform::host::{FileRegion, HostNoise, HostPlatform, SocketListener};
    use ownerguard::{EngineConfig, KeyStore, ProtocolEngine};

    /// CLI arguments for `ownerguard`
    #[derive(Parser, Debug)]
    #[command(name = "ownerguard", version, about = "Owner-key custody engine")]
    pub struct Args {
        /// Key region snapshot
        #[arg(short, long)]
        pub keyfile: PathBuf,

        /// Unix socket the host connects to
        #[arg(short, long, default_value = "/tmp/.cpid")]
        pub socket: PathBuf,

        /// TOML engine configuration
        #[arg(short, long)]
        pub config: Option<PathBuf>,

        /// Treat the user as always present for CHUP
        #[arg(long)]
        pub assume_present: bool,

        /// Pretend the service-mode strap is asserted (allows WIPE/SURE)
        #[arg(long)]
        pub service_mode: bool,
    }

    pub fn run() -> anyhow::Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        let args = Args::parse();

        info!("ownerguard v{} starting", env!("CARGO_PKG_VERSION"));

        let config = match &args.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        let mut region = FileRegion::new(&args.keyfile);
        let keys = KeyStore::load(&mut region)?;
        let platform = HostPlatform::new(region)
            .with_assume_present(args.assume_present)
            .with_service_mode(args.service_mode);

        let mut engine = ProtocolEngine::new(config, keys, HostNoise::default(), platform)?;
        let listener = SocketListener::bind(&args.socket)?;

        loop {
            let mut channel = listener.accept()?;
            if let Err(e) = engine.run(&mut channel) {
                warn!("Link error: {}", e);
            }
        }
    }

}
