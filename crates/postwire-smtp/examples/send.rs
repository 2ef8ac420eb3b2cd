#![allow(clippy::doc_markdown)]
//! Example: send one message, or a short sequence over one connection
//!
//! Settings come from the environment:
//!
//! - `SMTP_HOST` (required), `SMTP_PORT` (default 587)
//! - `SMTP_SECURITY`: `none`, `starttls` (default) or `implicit`
//! - `SMTP_USER` / `SMTP_PASS`: optional LOGIN or PLAIN credentials
//! - `MAIL_FROM`, `MAIL_TO`: sender and comma separated recipients
//! - `MAIL_COUNT`: messages to send sequentially (default 1)
//!
//! ## Running
//!
//! ```bash
//! SMTP_HOST=localhost SMTP_PORT=1025 SMTP_SECURITY=none \
//!   MAIL_FROM="Me <me@example.com>" MAIL_TO=you@example.com \
//!   cargo run --package postwire-smtp --example send
//! ```

use std::env;
use std::time::Duration;

use anyhow::{Context, bail};
use postwire_smtp::{Auth, Config, Mailer, Security, SendData};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postwire_smtp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = env::var("SMTP_HOST").context("SMTP_HOST is not set")?;
    let port = match env::var("SMTP_PORT") {
        Ok(port) => port.parse().context("SMTP_PORT is not a port number")?,
        Err(_) => 587,
    };
    let security = match env::var("SMTP_SECURITY").as_deref() {
        Ok("none") => Security::None,
        Ok("implicit") => Security::Implicit,
        Ok("starttls") | Err(_) => Security::StartTls,
        Ok(other) => bail!("unknown SMTP_SECURITY {other:?}"),
    };

    let mut builder = Config::builder(host)
        .port(port)
        .security(security)
        .connection_timeout(Duration::from_secs(10))
        .send_timeout(Duration::from_secs(30))
        .debug(true)
        .instance_id("example");
    if let (Ok(user), Ok(pass)) = (env::var("SMTP_USER"), env::var("SMTP_PASS")) {
        builder = builder.auth(Auth::login(user, pass));
    }
    let mailer = Mailer::new(builder.build());

    let from = env::var("MAIL_FROM").context("MAIL_FROM is not set")?;
    let to = env::var("MAIL_TO").context("MAIL_TO is not set")?;
    let count: usize = env::var("MAIL_COUNT")
        .ok()
        .map(|n| n.parse())
        .transpose()
        .context("MAIL_COUNT is not a number")?
        .unwrap_or(1);

    for n in 1..=count {
        let data = SendData::new()
            .from(from.as_str())
            .to(to.as_str())
            .subject(format!("postwire test {n}/{count}"))
            .body("Sent by the postwire-smtp example.\n");

        let outcome = if count == 1 {
            mailer.send(&data).await?
        } else {
            mailer.send_seq(&data).await?
        };
        println!("{n}: {}", outcome.response);
        for rejected in &outcome.rejected {
            println!("   rejected: {rejected}");
        }
    }

    mailer.end_seq().await;
    Ok(())
}
