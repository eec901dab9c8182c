use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall::{AdminDesk, Attendance, Config, NoPreview, Notice, Preview, SnapshotPreview};
use rollcall_core::{IdentityStore, OnnxProvider};
use rollcall_hw::{Camera, V4l2Opener};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in everyone the camera recognizes
    Checkin {
        /// Write the latest annotated frame to this JPEG file
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Admin actions (require credentials)
    Admin {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        #[command(subcommand)]
        action: AdminAction,
    },
    /// List enrolled names
    Identities {
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum AdminAction {
    /// Capture and enroll a face under NAME
    Register { name: String },
    /// Write attendance_<MONTH>.csv for a month (YYYY-MM)
    Export {
        month: String,
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(
        camera = %config.camera_device,
        faces = %config.faces_dir.display(),
        ledger = %config.ledger_path.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Checkin { preview } => {
            let mut app = open_app(&config)?;
            let mut sink: Box<dyn Preview> = match preview {
                Some(path) => Box::new(SnapshotPreview::new(path)),
                None => Box::new(NoPreview),
            };
            println!("Initializing camera for face recognition...");
            let notice = app.start_attendance(sink.as_mut())?;
            Ok(report(&notice))
        }
        Commands::Admin {
            username,
            password,
            action,
        } => {
            let desk = AdminDesk::new(&config);
            let admin = match desk.login(&username, &password) {
                Ok(admin) => admin,
                Err(notice) => return Ok(report(&notice)),
            };
            println!("{}", Notice::success("Welcome, Admin!"));

            match action {
                AdminAction::Register { name } => {
                    let mut app = open_app(&config)?;
                    println!("Capturing face image...");
                    let notice = app.register_face(&admin, &name)?;
                    Ok(report(&notice))
                }
                AdminAction::Export { month, out } => {
                    let response = desk.export_attendance(&admin, &month)?;
                    if let Some(export) = response.export.filter(|e| !e.is_empty()) {
                        let path = out.join(export.file_name());
                        std::fs::write(&path, export.to_csv()?)
                            .with_context(|| format!("writing {}", path.display()))?;
                        println!("Wrote {}", path.display());
                    }
                    Ok(report(&response.notice))
                }
            }
        }
        Commands::Identities { json } => {
            let store = IdentityStore::open(&config.faces_dir)?;
            let names = store.names()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("No registered faces");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}\t{}\t{} ({})", d.path, d.name, d.driver, d.bus);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load the face models and bind the camera. Only capture commands need this.
fn open_app(config: &Config) -> Result<Attendance<OnnxProvider, V4l2Opener>> {
    let provider = OnnxProvider::load(&config.model_dir, config.match_tolerance)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    Attendance::new(config, provider, V4l2Opener::new(&config.camera_device))
}

fn report(notice: &Notice) -> ExitCode {
    println!("{notice}");
    if notice.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
