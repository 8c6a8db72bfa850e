use anyhow::Result;
use clap::{Parser, Subcommand};

use mcp402::{cli, config, webapp};

#[derive(Parser)]
#[command(name = "mcp402")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Payment-gated MCP tool server")]
#[command(long_about = "\
mcp402 - payment-gated MCP tool server

Serves MCP tools over stateless streamable HTTP at /mcp. Every tool call is
charged to the caller's wallet, read from the x-agent-wallet header (or the
payer of an x402 X-Payment header), before the tool runs.

TYPICAL WORKFLOWS:

  Local testing with in-memory balances:
    mcp402 --credit alice=5 serve
    curl -H 'x-agent-wallet: alice' -H 'content-type: application/json' \\
      -d '{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\
\"params\":{\"name\":\"add\",\"arguments\":{\"a\":1,\"b\":2}}}' \\
      http://localhost:5003/mcp

  Against a ledger service:
    mcp402 --ledger-url https://ledger.example.com --ledger-api-key ... serve

For more details on each command, use: mcp402 <command> --help
")]
struct Cli {
    /// Global configuration arguments
    #[command(flatten)]
    config: config::ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server
    ///
    /// Example:
    ///
    ///  $ mcp402 serve
    ///
    ///  $ mcp402 --port 8080 --json-response serve
    ///
    Serve(webapp::ServeArgs),

    /// List registered tools and their prices
    ///
    /// Example:
    ///
    ///  $ mcp402 tools --json
    ///
    Tools(cli::tools::ToolsArgs),

    /// Print the effective configuration as JSON
    Config,

    /// Print version and build details
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let global_config = config::GlobalConfig::from_args(&cli.config)?;
    global_config.init_tracing()?;

    tracing::debug!("mcp402 starting");

    match cli.command {
        Commands::Serve(args) => webapp::run(args, &global_config).await?,
        Commands::Tools(args) => cli::tools::run(args, &global_config).await?,
        Commands::Config => cli::config::run(&global_config)?,
        Commands::Version => println!("{}", cli::version("mcp402")),
    }

    tracing::debug!("mcp402 shutting down");

    Ok(())
}
