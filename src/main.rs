// Copyright 2026 Consulta Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::collections::BTreeMap;

use consulta::config::PortalConfig;
use consulta::engine::{ConsultationEngine, DetailRequest, SearchRequest};

#[derive(Parser)]
#[command(
    name = "consulta",
    about = "Case-register consultation client for the PST portal",
    version,
    after_help = "Run 'consulta <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the regions seeding the cascading lookups
    Regions,
    /// List the judicial offices of a region
    Offices {
        /// Region code (see 'regions')
        region: String,
        /// Language code sent to the portal
        #[arg(long, default_value = "it")]
        lang: String,
    },
    /// List the case registers of an office
    Registers {
        /// Office code (see 'offices')
        office: String,
        #[arg(long, default_value = "it")]
        lang: String,
    },
    /// List the roles of a register
    Roles {
        /// Register code (see 'registers')
        register: String,
        #[arg(long, default_value = "it")]
        lang: String,
    },
    /// Search a register for a case by role number and year
    Search {
        #[arg(long)]
        region: String,
        #[arg(long)]
        office: String,
        #[arg(long)]
        register: String,
        /// Role number (numeric)
        #[arg(long)]
        numero: String,
        /// Role year (4 digits)
        #[arg(long)]
        anno: String,
        /// Reuse a page code resolved by a previous call
        #[arg(long)]
        page_code: Option<String>,
    },
    /// Fetch the detail of a case found by a previous search
    Detail {
        #[arg(long)]
        region: String,
        #[arg(long)]
        office: String,
        #[arg(long)]
        register: String,
        /// Detail parameter from the search result's link, as key=value.
        /// Repeat for each parameter.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(long)]
        page_code: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Merge the env flag before wiring the subscriber, so CONSULTA_VERBOSE
    // enables debug diagnostics just like --verbose does.
    let mut config = PortalConfig::from_env();
    config.verbose = config.verbose || cli.verbose;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_directive(config.verbose).parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let engine = ConsultationEngine::new(config);

    match cli.command {
        Commands::Regions => {
            print_pairs(&engine.regions(), cli.json)?;
        }
        Commands::Offices { region, lang } => {
            require_code("region", &region)?;
            let pairs = engine.list_offices(&region, Some(&lang)).await?;
            print_pairs(&pairs, cli.json)?;
        }
        Commands::Registers { office, lang } => {
            require_code("office", &office)?;
            let pairs = engine.list_registers(&office, Some(&lang)).await?;
            print_pairs(&pairs, cli.json)?;
        }
        Commands::Roles { register, lang } => {
            require_code("register", &register)?;
            let pairs = engine.list_roles(&register, Some(&lang)).await?;
            print_pairs(&pairs, cli.json)?;
        }
        Commands::Search {
            region,
            office,
            register,
            numero,
            anno,
            page_code,
        } => {
            require_code("region", &region)?;
            require_code("office", &office)?;
            require_code("register", &register)?;
            if numero.is_empty() || !numero.chars().all(|c| c.is_ascii_digit()) {
                bail!("role number must be numeric, got '{numero}'");
            }
            if anno.len() != 4 || !anno.chars().all(|c| c.is_ascii_digit()) {
                bail!("role year must be 4 digits, got '{anno}'");
            }

            let response = engine
                .search(&SearchRequest {
                    region,
                    office,
                    register,
                    role_number: numero,
                    role_year: anno,
                    page_code,
                })
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                if let Some(message) = &response.message {
                    println!("{message}");
                }
                for row in &response.results {
                    println!(
                        "{}  giudice: {}  rito: {}  prossima udienza: {}",
                        row.role_label.as_deref().unwrap_or("-"),
                        row.judge.as_deref().unwrap_or("-"),
                        row.procedure_type.as_deref().unwrap_or("-"),
                        row.next_hearing_date.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        Commands::Detail {
            region,
            office,
            register,
            params,
            page_code,
        } => {
            require_code("region", &region)?;
            require_code("office", &office)?;
            require_code("register", &register)?;
            let detail_params = parse_params(&params)?;
            if detail_params.is_empty() {
                bail!("at least one --param KEY=VALUE from a search result is required");
            }

            let response = engine
                .fetch_detail(&DetailRequest {
                    region,
                    office,
                    register,
                    detail_params,
                    page_code,
                })
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", format_detail(&response));
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "consulta", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn log_directive(verbose: bool) -> &'static str {
    if verbose {
        "consulta=debug"
    } else {
        "consulta=info"
    }
}

fn require_code(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} code must not be empty");
    }
    Ok(())
}

fn parse_params(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("invalid --param '{entry}', expected KEY=VALUE"))?;
        if key.is_empty() {
            bail!("invalid --param '{entry}', key must not be empty");
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

fn print_pairs(pairs: &[consulta::parse::CodeName], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(pairs)?);
    } else {
        for pair in pairs {
            println!("{}\t{}", pair.code, pair.name);
        }
    }
    Ok(())
}

/// Plain-text rendering of a detail response: general fields as `key: value`
/// lines, then one indented block per section.
fn format_detail(response: &consulta::engine::DetailResponse) -> String {
    let mut out = String::new();
    for (key, value) in &response.detail.general {
        out.push_str(&format!("{key}: {}\n", value.as_deref().unwrap_or("-")));
    }
    if !response.detail.party_types.is_empty() {
        out.push_str("parti:\n");
        for party in &response.detail.party_types {
            out.push_str(&format!("  {party}\n"));
        }
    }
    if !response.detail.history.is_empty() {
        out.push_str("storico:\n");
        for entry in &response.detail.history {
            out.push_str(&format!("  {}\n", entry.raw_line));
        }
    }
    for section in &response.detail.other_sections {
        out.push_str(&format!("{}:\n", section.title));
        for item in &section.items {
            out.push_str(&format!("  {item}\n"));
        }
    }
    out
}
