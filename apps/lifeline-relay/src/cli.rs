use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "lifeline-relay",
    about = "Signaling relay for ad-hoc remote-support sessions"
)]
pub struct Cli {
    /// Port to listen on (overrides LIFELINE_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Session time-to-live in seconds (overrides LIFELINE_SESSION_TTL)
    #[arg(long)]
    pub session_ttl: Option<u64>,
}
