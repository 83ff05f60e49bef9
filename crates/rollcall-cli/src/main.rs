use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    read_embedding, Embedding, EnrollmentRecord, EuclideanMatcher, GalleryEntry, Matcher,
    DEFAULT_THRESHOLD,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance face recognition CLI")]
struct Cli {
    /// Base URL of the rollcalld service
    #[arg(long, global = true, default_value = "http://127.0.0.1:5001")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Enroll a student photo (file name prefix before '-' is the student id)
    Enroll {
        /// Photo path as seen by the daemon
        image: PathBuf,
    },
    /// Take attendance from a classroom photo
    Recognize {
        /// Classroom photo path as seen by the daemon
        image: PathBuf,
        /// JSON file with `[{"id": .., "roll_number": .., "embedding_path": ..}]`
        #[arg(short, long)]
        roster: PathBuf,
    },
    /// Change the acceptance threshold
    Threshold {
        /// New threshold in [0, 1]
        value: f64,
    },
    /// Print the header and statistics of a stored embedding
    Inspect {
        embedding: PathBuf,
    },
    /// Distance and confidence between two stored embeddings
    Compare {
        a: PathBuf,
        b: PathBuf,
        /// Threshold to judge the pair against
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.url);

    match cli.command {
        Commands::Status => {
            let health = client.get("health").await?;
            println!("rollcalld: {}", health["status"].as_str().unwrap_or("unknown"));
            println!("  embeddings: {}", health["embeddings_count"]);
            println!("  threshold:  {}", health["threshold"]);
        }
        Commands::Enroll { image } => {
            let body = json!({ "image_path": absolute(&image)? });
            let reply = client.post("generate-embedding", &body).await?;
            println!("Enrolled: {}", reply["embedding_path"].as_str().unwrap_or_default());
        }
        Commands::Recognize { image, roster } => {
            let students = load_roster(&roster)?;
            let body = json!({ "image_path": absolute(&image)?, "students": students });
            let reply: RecognizeReply = serde_json::from_value(
                client.post("recognize-faces", &body).await?,
            )
            .context("unexpected recognize-faces response")?;
            print_attendance(&reply);
        }
        Commands::Threshold { value } => {
            let reply = client
                .post("update-threshold", &json!({ "threshold": value }))
                .await?;
            println!("Threshold set to {}", reply["threshold"]);
        }
        Commands::Inspect { embedding } => {
            let vector = load_embedding(&embedding)?;
            let norm = vector.values.iter().map(|v| v * v).sum::<f32>().sqrt();
            println!("{}", embedding.display());
            println!("  dimension: {}", vector.dim());
            println!("  l2 norm:   {norm:.4}");
            let head: Vec<String> = vector.values.iter().take(8).map(|v| format!("{v:.4}")).collect();
            println!("  values:    [{}{}]", head.join(", "), if vector.dim() > 8 { ", ..." } else { "" });
        }
        Commands::Compare { a, b, threshold } => {
            let probe = load_embedding(&a)?;
            let gallery = [GalleryEntry {
                student_id: b.display().to_string().as_str().into(),
                embedding: load_embedding(&b)?,
            }];
            let Some(nearest) = EuclideanMatcher.nearest(&probe, &gallery)? else {
                bail!("distance between {} and {} is undefined", a.display(), b.display());
            };
            let confidence = nearest.confidence();
            println!("distance:   {:.4}", nearest.distance);
            println!("confidence: {confidence:.4}");
            println!(
                "verdict:    {} at threshold {threshold}",
                if confidence >= threshold { "match" } else { "no match" }
            );
        }
    }

    Ok(())
}

/// Thin JSON client for the daemon.
struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.endpoint(path))
            .send()
            .await
            .with_context(|| format!("cannot reach rollcalld at {}", self.base))?;
        read_reply(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        tracing::debug!(path, "posting request");
        let response = self
            .http
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("cannot reach rollcalld at {}", self.base))?;
        read_reply(response).await
    }
}

async fn read_reply(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("response is not JSON")?;
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("no error message");
        bail!("rollcalld returned {status}: {message}");
    }
    Ok(body)
}

#[derive(Deserialize)]
struct RecognizeReply {
    recognized_students: Vec<RecognizedStudent>,
    unknown_faces: Vec<UnknownFace>,
    total_faces: usize,
}

#[derive(Deserialize)]
struct RecognizedStudent {
    student_id: Value,
    confidence: f32,
}

#[derive(Deserialize)]
struct UnknownFace {
    face_image_path: String,
}

fn print_attendance(reply: &RecognizeReply) {
    println!("Faces detected: {}", reply.total_faces);
    for student in &reply.recognized_students {
        println!(
            "  present  {:<12} confidence {:.2}",
            student.student_id.to_string(),
            student.confidence.clamp(0.0, 1.0)
        );
    }
    for face in &reply.unknown_faces {
        println!("  unknown  {}", face.face_image_path);
    }
    let dropped = reply
        .total_faces
        .saturating_sub(reply.recognized_students.len() + reply.unknown_faces.len());
    if dropped > 0 {
        println!("  ({dropped} duplicate claim(s) dropped)");
    }
}

fn load_roster(path: &Path) -> Result<Vec<EnrollmentRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading roster {}", path.display()))?;
    let roster: Vec<EnrollmentRecord> = serde_json::from_str(&text)
        .with_context(|| format!("parsing roster {}", path.display()))?;
    if roster.is_empty() {
        bail!("roster {} lists no students", path.display());
    }
    Ok(roster)
}

fn load_embedding(path: &Path) -> Result<Embedding> {
    read_embedding(path)?.with_context(|| format!("no embedding at {}", path.display()))
}

/// The daemon resolves paths from its own working directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{EmbeddingStore, StudentId};

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = Client::new("http://classroom:5001/");
        assert_eq!(client.endpoint("health"), "http://classroom:5001/health");
    }

    #[test]
    fn test_load_roster_keeps_id_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"[{"id": 7, "roll_number": "CS-07", "embedding_path": "/e/student_7.emb"},
               {"id": "s-8"}]"#,
        )
        .unwrap();

        let roster = load_roster(&path).unwrap();
        assert_eq!(roster[0].id, StudentId::Number(7));
        assert_eq!(roster[1].id, StudentId::Text("s-8".into()));
        assert!(roster[1].embedding_path.is_none());
    }

    #[test]
    fn test_load_roster_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(load_roster(&path).is_err());
    }

    #[test]
    fn test_load_embedding_from_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::open(dir.path()).unwrap();
        let path = store.save(&Embedding::new(vec![0.25, -0.5]), "student_3").unwrap();

        let loaded = load_embedding(&path).unwrap();
        assert_eq!(loaded.values, vec![0.25, -0.5]);
        assert!(load_embedding(&dir.path().join("student_4.emb")).is_err());
    }

    #[test]
    fn test_load_embedding_leaves_missing_dirs_alone() {
        let dir = tempfile::tempdir().unwrap();
        let typo = dir.path().join("embedings/student_3.emb");
        assert!(load_embedding(&typo).is_err());
        assert!(!dir.path().join("embedings").exists());
    }

    #[test]
    fn test_absolute_joins_cwd() {
        let path = absolute(Path::new("photos/1-a.jpg")).unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("photos/1-a.jpg"));
    }
}
