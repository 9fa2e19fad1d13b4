use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facewatch", about = "facewatch identification CLI")]
struct Cli {
    /// Base URL of the facewatchd HTTP server
    #[arg(long, env = "FACEWATCH_URL", default_value = "http://127.0.0.1:8710")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person from a face photo
    Enroll {
        /// Display name the identifier is derived from
        #[arg(short, long)]
        name: String,
        /// Face photo
        image: PathBuf,
    },
    /// Replace the stored face of an enrolled identifier
    Reenroll {
        /// Identifier returned by a previous enroll
        identifier: String,
        /// Face photo
        image: PathBuf,
    },
    /// Identify the person in a face photo
    Identify {
        /// Face photo
        image: PathBuf,
    },
    /// Send an alert message (and call, if configured) to a family member
    Alert {
        /// Message text
        #[arg(short, long)]
        text: String,
        /// Recipient phone number; the daemon default is used when omitted
        #[arg(short, long)]
        number: Option<String>,
    },
    /// List enrolled identifiers
    List,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server);

    let reply = match cli.command {
        Commands::Enroll { name, image } => {
            let form = Form::new()
                .text("name", name)
                .part("image", image_part(&image).await?);
            client.post_multipart("/enroll", form).await?
        }
        Commands::Reenroll { identifier, image } => {
            let form = Form::new()
                .text("identifier", identifier)
                .part("image", image_part(&image).await?);
            client.post_multipart("/reenroll", form).await?
        }
        Commands::Identify { image } => {
            let form = Form::new().part("image", image_part(&image).await?);
            client.post_multipart("/identify", form).await?
        }
        Commands::Alert { text, number } => {
            client
                .post_json("/send_alert", json!({ "text": text, "number": number }))
                .await?
        }
        Commands::List => client.get("/gallery").await?,
        Commands::Status => client.get("/status").await?,
    };

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn image_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}

/// Thin JSON client for the daemon's HTTP surface.
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

    async fn get(&self, path: &str) -> Result<Value> {
        tracing::debug!(path, "GET");
        let response = self.http.get(self.url(path)).send().await.context("contacting facewatchd")?;
        read_reply(response).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        tracing::debug!(path, "POST json");
        let response = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .context("contacting facewatchd")?;
        read_reply(response).await
    }

    async fn post_multipart(&self, path: &str, form: Form) -> Result<Value> {
        tracing::debug!(path, "POST multipart");
        let response = self
            .http
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .context("contacting facewatchd")?;
        read_reply(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn read_reply(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| body.to_string());
        bail!("facewatchd returned {status}: {message}");
    }
    Ok(body)
}
