use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::Subcommand;
use serde_json::json;
use std::time::Duration;

use crate::auth::{Claims, TokenCodec, TokenError};
use crate::cli::utils::{output_error, output_fields, output_success};
use crate::cli::OutputFormat;
use crate::config::AppConfig;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Sign a new access token")]
    Issue {
        #[arg(help = "Subject the token is issued to")]
        subject: String,
        #[arg(long = "scope", short = 's', value_delimiter = ',', help = "Granted scope (repeatable or comma separated)")]
        scopes: Vec<String>,
        #[arg(long, help = "Lifetime in seconds (defaults to SECURITY_TOKEN_TTL_SECS)")]
        ttl: Option<u64>,
    },

    #[command(about = "Verify a token and show its claims")]
    Inspect {
        #[arg(help = "Raw JWT")]
        token: String,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    let codec = TokenCodec::new(config.security.jwt_secret.as_bytes(), config.jwt_algorithm()?)
        .context("building token codec")?
        .with_skew(Duration::from_secs(config.security.clock_skew_secs));

    match cmd {
        TokenCommands::Issue { subject, scopes, ttl } => {
            let ttl = Duration::from_secs(ttl.unwrap_or(config.security.token_ttl_secs));
            let token = codec.issue(&subject, scopes, ttl).context("issuing token")?;
            tracing::info!("Issued token {} for {}", token.claims.jti, subject);

            output_success(
                &output_format,
                &format!("Issued token for {}", subject),
                Some(json!({ "token": token.raw, "claims": token.claims })),
            )?;
            output_fields(&output_format, &describe(&token.claims));
            if let OutputFormat::Text = output_format {
                println!("\n{}", token.raw);
            }
            Ok(())
        }
        TokenCommands::Inspect { token } => match codec.decode(token.trim()) {
            Ok(claims) => {
                output_success(&output_format, "Token is valid", Some(json!({ "claims": claims })))?;
                output_fields(&output_format, &describe(&claims));
                Ok(())
            }
            Err(err) => {
                let code = match err {
                    TokenError::Expired => "TOKEN_EXPIRED",
                    TokenError::Invalid(_) => "TOKEN_INVALID",
                };
                output_error(&output_format, &err.to_string(), Some(code))?;
                anyhow::bail!("token rejected")
            }
        },
    }
}

fn timestamp(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn describe(claims: &Claims) -> Vec<(&'static str, String)> {
    let scopes: Vec<&str> = claims.scopes.iter().map(String::as_str).collect();
    vec![
        ("subject", claims.sub.clone()),
        ("scopes", scopes.join(" ")),
        ("issued", timestamp(claims.iat)),
        ("expires", timestamp(claims.exp)),
        ("id", claims.jti.to_string()),
    ]
}
