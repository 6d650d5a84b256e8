use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, identity: &str, name: &str, photo: Vec<u8>) -> zbus::Result<String>;
    async fn recognize(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn mark_attendance(&self, identity: &str) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn list_attendance(&self, day: &str) -> zbus::Result<String>;
    async fn remove_identity(&self, identity: &str) -> zbus::Result<bool>;
    async fn refresh(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from a photo
    Enroll {
        /// Unique identity key (roll number, badge id, ...)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Path to the photo file
        #[arg(long)]
        photo: PathBuf,
    },
    /// Recognize faces in a photo against the enrolled gallery
    Check {
        /// Path to the photo file
        #[arg(long)]
        photo: PathBuf,
        /// Also mark attendance for the closest recognized face
        #[arg(long)]
        mark: bool,
    },
    /// Mark an identity present for today
    Mark {
        /// Identity key
        id: String,
    },
    /// List enrolled identities
    List,
    /// Show attendance for a day (defaults to today)
    Attendance {
        /// Day as YYYY-MM-DD
        #[arg(long)]
        day: Option<String>,
    },
    /// Remove an identity and its descriptors
    Remove {
        /// Identity key
        id: String,
    },
    /// Rebuild the daemon's descriptor cache from the store
    Refresh,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connect to bus (is rollcalld running?)")?;
    tracing::debug!(system_bus = cli.system, "connected to bus");
    let proxy = AttendanceProxy::new(&connection).await?;

    match cli.command {
        Commands::Enroll { id, name, photo } => {
            let bytes = std::fs::read(&photo)
                .with_context(|| format!("read photo {}", photo.display()))?;
            print_json(&proxy.enroll(&id, &name, bytes).await?)?;
        }
        Commands::Check { photo, mark } => {
            let bytes = std::fs::read(&photo)
                .with_context(|| format!("read photo {}", photo.display()))?;
            let reply = proxy.recognize(bytes).await?;
            print_json(&reply)?;

            if mark {
                let parsed: serde_json::Value =
                    serde_json::from_str(&reply).context("parse recognize reply")?;
                match best_match_key(&parsed) {
                    Some(key) => print_json(&proxy.mark_attendance(&key).await?)?,
                    None => println!("no recognized face to mark"),
                }
            }
        }
        Commands::Mark { id } => print_json(&proxy.mark_attendance(&id).await?)?,
        Commands::List => print_json(&proxy.list_identities().await?)?,
        Commands::Attendance { day } => {
            print_json(&proxy.list_attendance(day.as_deref().unwrap_or("")).await?)?;
        }
        Commands::Remove { id } => {
            if proxy.remove_identity(&id).await? {
                println!("removed {id}");
            } else {
                println!("nothing enrolled under {id}");
            }
        }
        Commands::Refresh => print_json(&proxy.refresh().await?)?,
        Commands::Status => print_json(&proxy.status().await?)?,
    }

    Ok(())
}

/// Pretty-print a JSON reply from the daemon.
fn print_json(payload: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(payload).context("parse daemon reply")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Identity key of the closest recognized face in a recognize reply.
fn best_match_key(reply: &serde_json::Value) -> Option<String> {
    let faces = reply.get("faces")?.as_array()?;
    let mut best: Option<(&str, f64)> = None;
    for face in faces {
        let Some(key) = face
            .get("identity")
            .and_then(|i| i.get("key"))
            .and_then(|k| k.as_str())
        else {
            continue;
        };
        let distance = face.get("distance").and_then(|d| d.as_f64()).unwrap_or(f64::MAX);
        if best.map_or(true, |(_, b)| distance < b) {
            best = Some((key, distance));
        }
    }
    best.map(|(key, _)| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_takes_photo_as_long_flag() {
        let cli = Cli::try_parse_from(["rollcall", "check", "--photo", "class.jpg", "--mark"])
            .expect("check accepts --photo and --mark");
        let Commands::Check { photo, mark } = cli.command else {
            panic!("expected the check subcommand");
        };
        assert_eq!(photo, PathBuf::from("class.jpg"));
        assert!(mark);

        let cli = Cli::try_parse_from(["rollcall", "check", "--photo", "class.jpg"])
            .expect("mark is optional");
        let Commands::Check { mark, .. } = cli.command else {
            panic!("expected the check subcommand");
        };
        assert!(!mark);

        assert!(Cli::try_parse_from(["rollcall", "check", "class.jpg"]).is_err());
    }

    #[test]
    fn test_best_match_key_picks_closest() {
        let reply = serde_json::json!({
            "no_face": false,
            "faces": [
                { "identity": { "key": "S2", "name": "Grace" }, "distance": 0.5 },
                { "identity": { "key": "S1", "name": "Ada" }, "distance": 0.2 },
                { "identity": null, "distance": 0.1 },
            ]
        });
        assert_eq!(best_match_key(&reply).as_deref(), Some("S1"));
    }

    #[test]
    fn test_best_match_key_skips_unknown_faces() {
        let reply = serde_json::json!({
            "no_face": false,
            "faces": [ { "identity": null, "distance": 0.9 } ]
        });
        assert_eq!(best_match_key(&reply), None);
    }

    #[test]
    fn test_best_match_key_handles_no_face_reply() {
        let reply = serde_json::json!({ "no_face": true, "faces": [] });
        assert_eq!(best_match_key(&reply), None);
    }
}
