use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gatecheck_store::{
    artifacts, token_digest, ArtifactSource, ScanJournal, SqliteDirectory, StudentRecord,
};

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

#[derive(Parser)]
#[command(name = "gatecheck", about = "Gatecheck face-recognition gate CLI", version)]
struct Cli {
    /// SQLite database holding enrollment records and the scan journal
    #[arg(long, global = true, env = "GATECHECK_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an image to the scan service and print the result
    Scan {
        /// Image file (any common raster format)
        image: PathBuf,
        #[arg(long, env = "GATECHECK_SERVER", default_value = DEFAULT_SERVER)]
        server: String,
        /// Bearer token of a GATE-role device
        #[arg(long, env = "GATECHECK_TOKEN")]
        token: String,
    },
    /// Show scan service status
    Status {
        #[arg(long, env = "GATECHECK_SERVER", default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Manage enrollment records
    Student {
        #[command(subcommand)]
        action: StudentAction,
    },
    /// Show recently logged scans
    Journal {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the SHA-256 digest of a token for tokens.toml
    HashToken { token: String },
    /// Download missing similarity-index artifacts
    FetchArtifacts {
        #[arg(long, env = "GATECHECK_ARTIFACT_URL")]
        url: String,
        #[arg(long, env = "GATECHECK_ARTIFACT_API_KEY")]
        api_key: Option<String>,
        /// Target directory (default: <data>/embeddings)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Artifact file names
        #[arg(default_value = "face_index.json")]
        files: Vec<String>,
    },
}

#[derive(Subcommand)]
enum StudentAction {
    /// Add or update a record
    Add {
        /// Index key (stored lowercase)
        key: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        id_number: Option<String>,
        #[arg(long)]
        college: Option<String>,
        #[arg(long)]
        year_level: Option<String>,
    },
    /// Remove a record
    Remove { key: String },
    /// List all records
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = cli.db.unwrap_or_else(gatecheck_store::default_db_path);

    match cli.command {
        Commands::Scan {
            image,
            server,
            token,
        } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;
            let file_name = image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "frame".to_string());
            let form = reqwest::multipart::Form::new().part(
                "frame",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
            let response = reqwest::Client::new()
                .post(endpoint(&server, "scan"))
                .bearer_auth(token)
                .multipart(form)
                .send()
                .await
                .with_context(|| format!("contacting {server}"))?;
            print_json_response(response).await?;
        }
        Commands::Status { server } => {
            let response = reqwest::get(endpoint(&server, "status"))
                .await
                .with_context(|| format!("contacting {server}"))?;
            print_json_response(response).await?;
        }
        Commands::Student { action } => {
            let directory = SqliteDirectory::open(&db)?;
            match action {
                StudentAction::Add {
                    key,
                    name,
                    id_number,
                    college,
                    year_level,
                } => {
                    let record = StudentRecord {
                        faiss_name_key: key.to_lowercase(),
                        student_name: name,
                        student_id: id_number,
                        college,
                        year_level,
                    };
                    directory.upsert(&record)?;
                    println!("Saved {}", record.faiss_name_key);
                }
                StudentAction::Remove { key } => {
                    if !directory.remove(&key)? {
                        bail!("no record for {key}");
                    }
                    println!("Removed {}", key.to_lowercase());
                }
                StudentAction::List => {
                    let records = directory.list()?;
                    if records.is_empty() {
                        println!("No students registered");
                    }
                    for r in records {
                        println!(
                            "{:<24} {:<28} {:<14} {:<8} {}",
                            r.faiss_name_key,
                            r.student_name.as_deref().unwrap_or("-"),
                            r.student_id.as_deref().unwrap_or("-"),
                            r.college.as_deref().unwrap_or("-"),
                            r.year_level.as_deref().unwrap_or("-"),
                        );
                    }
                }
            }
        }
        Commands::Journal { limit } => {
            let journal = ScanJournal::open(&db)?;
            for entry in journal.recent(limit)? {
                println!(
                    "{}  gate {:<4} {:<28} {:.2}",
                    entry.logged_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.gate,
                    entry.name,
                    entry.similarity,
                );
            }
        }
        Commands::HashToken { token } => {
            println!("{}", token_digest(&token));
        }
        Commands::FetchArtifacts {
            url,
            api_key,
            dir,
            files,
        } => {
            let dir = dir.unwrap_or_else(|| gatecheck_store::default_data_dir().join("embeddings"));
            let source = match api_key {
                Some(key) => ArtifactSource::new(url).with_api_key(key),
                None => ArtifactSource::new(url),
            };
            let paths = tokio::task::spawn_blocking(move || {
                let names: Vec<&str> = files.iter().map(String::as_str).collect();
                artifacts::ensure_local(&dir, &names, Some(&source))
            })
            .await??;
            for path in paths {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

fn endpoint(server: &str, path: &str) -> String {
    format!("{}/{}", server.trim_end_matches('/'), path)
}

async fn print_json_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let text = response.text().await.context("reading response")?;
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
        Err(_) => println!("{text}"),
    }
    if !status.is_success() {
        bail!("server returned {status}");
    }
    Ok(())
}
