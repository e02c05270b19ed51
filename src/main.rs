// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::Path;

use clap::{crate_version, Parser, Subcommand};
use sfxplay::controller::{self, Controller};
use sfxplay::samples::PlaybackEngine;
use sfxplay::{audio, config};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=sound effect player
After=network-online.target sound.target

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/sfxplay
ExecStart=/usr/local/bin/sfxplay start "$SFXPLAY_CONFIG"

[Install]
WantedBy=multi-user.target
Alias=sfxplay.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A remotely controlled sound effect player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start will start the sound effect player.
    Start {
        /// The path to the player config.
        player_path: String,
        /// Prepended to every sample identifier. Overrides the config file.
        #[arg(short, long)]
        uri_prefix: Option<String>,
        /// A sample to load at startup. May be given more than once.
        #[arg(short, long)]
        preload: Vec<String>,
        /// Log every command at debug level.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            player_path,
            uri_prefix,
            preload,
            verbose,
        } => {
            init_logging(verbose);

            let mut player_config = config::Player::deserialize(Path::new(&player_path))?;
            if let Some(uri_prefix) = uri_prefix {
                player_config.set_uri_prefix(&uri_prefix);
            }
            player_config.extend_preload(preload);

            let (backend, decoder) = audio::get_backend(player_config.audio())?;
            info!(backend = %backend, "Audio backend ready");
            let mut engine = PlaybackEngine::new(
                backend,
                decoder,
                player_config.uri_prefix().map(str::to_string),
            );

            // Loading may block on file or network I/O.
            let preload = player_config.preload().to_vec();
            let engine = tokio::task::spawn_blocking(move || {
                if !preload.is_empty() {
                    let loaded = engine.preload(preload.iter().map(String::as_str));
                    info!(loaded, requested = preload.len(), "Preloaded samples");
                }
                engine
            })
            .await?;

            let driver = controller::driver(player_config.controller())?;
            let mut controller = Controller::new(engine, driver);

            let interrupted = tokio::select! {
                result = controller.join() => {
                    result?;
                    false
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    true
                }
            };
            if interrupted {
                info!("Interrupted, shutting down.");
                controller.shutdown().await;
                controller.join().await?;
            }
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
