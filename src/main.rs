//! Openbank client binary.
//!
//! Run with: `openbank-client --user 12345678Z balance`
//!
//! Credentials default to `BANK_SCRAP_USER` / `BANK_SCRAP_PASSWORD`.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use openbank_client::transport::ip_discovery_from_config;
use openbank_client::{
    find_account_by_iban, ClientConfig, Credentials, DateRange, HttpTransport, OpenbankClient,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command line client for Openbank accounts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "openbank.yaml")]
    config: PathBuf,

    /// User id (national id document)
    #[arg(short, long, env = "BANK_SCRAP_USER")]
    user: String,

    /// Password
    #[arg(short, long, env = "BANK_SCRAP_PASSWORD", hide_env_values = true)]
    password: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Output::Text)]
    output: Output,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the balance of every account
    Balance,

    /// List an account's transactions
    Transactions {
        /// IBAN of the account (defaults to the first account)
        #[arg(long)]
        iban: Option<String>,

        /// First day, d-m-Y (defaults to one month ago)
        #[arg(long)]
        from: Option<String>,

        /// Last day, d-m-Y (defaults to today)
        #[arg(long)]
        to: Option<String>,
    },
}

/// A command with its arguments validated.
enum Request {
    Balance,
    Transactions {
        iban: Option<String>,
        range: DateRange,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Output {
    Text,
    Yaml,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse().unwrap_or(Level::WARN);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = if args.config.exists() {
        info!("Config file: {}", args.config.display());
        ClientConfig::from_file(&args.config).context("Failed to load config file")?
    } else {
        info!("Config file not found, using defaults");
        ClientConfig::default()
    };

    // Validate dates before touching the network.
    let today = Local::now().date_naive();
    let request = match args.command {
        Command::Balance => Request::Balance,
        Command::Transactions { iban, from, to } => Request::Transactions {
            iban,
            range: DateRange::with_defaults(
                parse_cli_date(from.as_deref())?,
                parse_cli_date(to.as_deref())?,
                today,
            )?,
        },
    };

    let transport = HttpTransport::new(&config).context("Failed to create HTTP client")?;
    let ip_source = ip_discovery_from_config(&config)?;
    let credentials = Credentials::new(&args.user, args.password);

    let session = OpenbankClient::new(config, transport)
        .login(&credentials, &ip_source)
        .await
        .context("Login failed")?;

    let accounts = session
        .fetch_accounts()
        .await
        .context("Failed to fetch accounts")?;

    match request {
        Request::Balance => match args.output {
            Output::Yaml => print!("{}", serde_yaml::to_string(&accounts)?),
            Output::Text => {
                for account in &accounts {
                    println!("Account: {} ({})", account.description, account.iban);
                    println!("Balance: {}", account.balance);
                }
            }
        },
        Request::Transactions { iban, range } => {
            let account = match iban.as_deref() {
                Some(iban) => find_account_by_iban(&accounts, iban)
                    .ok_or_else(|| anyhow!("No account with IBAN {}", iban))?,
                None => accounts.first().ok_or_else(|| anyhow!("No accounts found"))?,
            };

            let transactions = session
                .fetch_transactions(account, range)
                .await
                .context("Failed to fetch transactions")?;

            match args.output {
                Output::Yaml => print!("{}", serde_yaml::to_string(&transactions)?),
                Output::Text => {
                    println!(
                        "Transactions for: {} ({})",
                        account.description, account.iban
                    );
                    for transaction in &transactions {
                        let sign = if transaction.amount.is_negative() { '-' } else { '+' };
                        println!("{} {}", sign, transaction);
                    }
                }
            }
        }
    }

    info!(
        requests = session.metrics().requests_sent(),
        "Done"
    );
    Ok(())
}

/// Parse a `d-m-Y` command line date.
fn parse_cli_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    value
        .map(|text| {
            NaiveDate::parse_from_str(text, "%d-%m-%Y")
                .with_context(|| format!("Invalid date {:?}, expected d-m-Y", text))
        })
        .transpose()
}
