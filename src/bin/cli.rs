use clap::{Parser, Subcommand, ValueEnum};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;

const TOKEN_FILE: &str = ".site_token";

#[derive(Parser)]
#[command(name = "site-cli")]
#[command(about = "Admin CLI for the Infetech site API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:11111")]
    url: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Leads,
    Campaigns,
    Images,
}

impl Kind {
    fn path(&self) -> &'static str {
        match self {
            Kind::Leads => "leads",
            Kind::Campaigns => "campaigns",
            Kind::Images => "images",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
}

impl Format {
    fn as_str(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Json => "json",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// List records, optionally filtered
    List {
        #[arg(value_enum)]
        kind: Kind,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        service: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Pre-filled edit values for one record
    Get {
        #[arg(value_enum)]
        kind: Kind,
        #[arg(short, long)]
        id: String,
    },
    /// Apply a JSON patch to one record
    Update {
        #[arg(value_enum)]
        kind: Kind,
        #[arg(short, long)]
        id: String,
        #[arg(short = 'P', long, default_value = "{}")]
        patch: String,
    },
    Delete {
        #[arg(value_enum)]
        kind: Kind,
        #[arg(short, long)]
        id: String,
        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
    Export {
        #[arg(value_enum)]
        kind: Kind,
        #[arg(short, long, value_enum, default_value = "csv")]
        format: Format,
        #[arg(short, long)]
        output: Option<String>,
    },
    Import {
        #[arg(value_enum)]
        kind: Kind,
        #[arg(short = 'F', long)]
        file: String,
        #[arg(short, long, value_enum, default_value = "csv")]
        format: Format,
    },
    Dashboard,
    /// Preview personalization for a landing-page query string
    Personalize {
        #[arg(short, long, default_value = "")]
        query: String,
        #[arg(long)]
        ip: Option<String>,
    },
    Config,
    Logout,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

fn authed(builder: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    builder.header("Authorization", format!("Bearer {}", token.trim()))
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => println!("{} {}", status, serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{} {}", status, text),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let admin = |kind: Kind| format!("{}/admin/{}", cli.url, kind.path());

    match cli.command {
        Commands::Login { email, password } => {
            let res = client
                .post(format!("{}/login", cli.url))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                // Save token
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in. Token saved to {}", TOKEN_FILE);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::List { kind, status, source, service, category, query } => {
            let mut params: Vec<(&str, String)> = vec![];
            for (name, value) in [
                ("status", status),
                ("source", source),
                ("service", service),
                ("category", category),
                ("query", query),
            ] {
                if let Some(value) = value {
                    params.push((name, value));
                }
            }
            let res = authed(client.get(admin(kind)).query(&params)).send().await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            let body: Value = res.json().await?;
            let records = body["records"].as_array().cloned().unwrap_or_default();
            println!("{} of {} {}", records.len(), body["total"], kind.path());
            for record in records {
                let label = ["name", "filename"]
                    .iter()
                    .find_map(|f| record[*f].as_str().filter(|s| !s.is_empty()))
                    .unwrap_or("-");
                println!("  {}  {}  {}", record["id"].as_str().unwrap_or(""), label, record["status"]);
            }
        }
        Commands::Get { kind, id } => {
            let res = authed(client.get(format!("{}/{}", admin(kind), id))).send().await?;
            print_response(res).await?;
        }
        Commands::Update { kind, id, patch } => {
            let patch: Value = serde_json::from_str(&patch)?;
            let res = authed(client.put(format!("{}/{}", admin(kind), id)))
                .json(&patch)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Delete { kind, id, yes } => {
            if !yes {
                println!("Refusing to delete {} without --yes", id);
                return Ok(());
            }
            let res = authed(client.delete(format!("{}/{}", admin(kind), id)))
                .query(&[("confirm", "true")])
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Export { kind, format, output } => {
            let res = authed(client.get(format!("{}/export", admin(kind))))
                .query(&[("format", format.as_str())])
                .send()
                .await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            let body = res.text().await?;
            match output {
                Some(path) => {
                    fs::write(&path, body)?;
                    println!("Exported {} to {}", kind.path(), path);
                }
                None => print!("{}", body),
            }
        }
        Commands::Import { kind, file, format } => {
            let body = fs::read_to_string(&file)?;
            let res = authed(client.post(format!("{}/import", admin(kind))))
                .query(&[("format", format.as_str())])
                .body(body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Dashboard => {
            let res = authed(client.get(format!("{}/admin/dashboard", cli.url))).send().await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            let body: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&body["stats"])?);
        }
        Commands::Personalize { query, ip } => {
            let mut url = format!("{}/personalize?{}", cli.url, query.trim_start_matches('?'));
            if let Some(ip) = ip {
                url.push_str(&format!("&ip={}", ip));
            }
            let res = client.get(url).send().await?;
            print_response(res).await?;
        }
        Commands::Config => {
            let res = authed(client.get(format!("{}/admin/config", cli.url))).send().await?;
            print_response(res).await?;
        }
        Commands::Logout => {
            let res = authed(client.post(format!("{}/admin/logout", cli.url))).send().await;
            if let Err(e) = res {
                println!("Server logout failed: {}", e);
            }
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
    }

    Ok(())
}
