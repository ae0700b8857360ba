//! TFROST Party CLI
//!
//! Command-line interface for running threshold Schnorr party operations:
//! - Distributed Key Generation (DKG)
//! - Threshold signing
//! - Signature verification

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use msg_relay_client::RelayClient;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tfrost_core::session::{Coordinator, DkgFaultPolicy, ExclusionPolicy, ProtocolConfig};
use tfrost_core::{
    session_id_from_label, verify, GroupPublicKey, KeyShare, ParticipantId, SessionId, Signature,
};
use tracing::{info, Level};
use zeroize::Zeroizing;

/// TFROST Party - threshold signing node
#[derive(Parser)]
#[command(name = "tfrost-party")]
#[command(about = "FROST threshold Schnorr party node")]
#[command(version)]
struct Cli {
    /// Relay service URL
    #[arg(short, long, env = "RELAY_URL", default_value = "http://127.0.0.1:8080")]
    relay: String,

    /// Participant ID (1-indexed)
    #[arg(short, long, env = "PARTICIPANT_ID")]
    participant_id: Option<ParticipantId>,

    /// Data directory for key shares
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    /// Per-round timeout in seconds
    #[arg(
        long,
        env = "ROUND_TIMEOUT_SECS",
        default_value_t = tfrost_core::DEFAULT_ROUND_TIMEOUT_SECS
    )]
    round_timeout: u64,

    /// DKG fault policy: abort or exclude-faulty
    #[arg(long, env = "DKG_FAULT_POLICY", default_value = "abort")]
    dkg_fault_policy: DkgFaultPolicy,

    /// Fault exclusion policy: session-local or ban
    #[arg(long, env = "EXCLUSION_POLICY", default_value = "session-local")]
    exclusion_policy: ExclusionPolicy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distributed key generation
    Keygen {
        /// Number of parties; IDs are 1..=n
        #[arg(short, long, default_value_t = tfrost_core::DEFAULT_PARTIES)]
        n: usize,

        /// Threshold (t-of-n)
        #[arg(short, long, default_value_t = tfrost_core::DEFAULT_THRESHOLD)]
        t: usize,

        /// Session label shared by all parties
        #[arg(short, long)]
        session: String,
    },

    /// Sign a message
    Sign {
        /// Message to sign
        #[arg(short, long)]
        message: String,

        /// Treat the message as hex
        #[arg(long)]
        hex: bool,

        /// Participating IDs (comma-separated)
        #[arg(long)]
        signers: String,

        /// Session label shared by all signers
        #[arg(short, long)]
        session: String,
    },

    /// Verify a signature against a group public key
    Verify {
        /// Group public key (hex, compressed)
        #[arg(long)]
        public_key: String,

        /// Signed message
        #[arg(short, long)]
        message: String,

        /// Treat the message as hex
        #[arg(long)]
        hex: bool,

        /// Signature (hex, R || z)
        #[arg(long)]
        signature: String,
    },

    /// Show key share info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Keygen { n, t, session } => {
            run_keygen(&cli, *n, *t, session).await?;
        }
        Commands::Sign {
            message,
            hex,
            signers,
            session,
        } => {
            let message = parse_message(message, *hex)?;
            run_sign(&cli, &message, signers, session).await?;
        }
        Commands::Verify {
            public_key,
            message,
            hex,
            signature,
        } => {
            let message = parse_message(message, *hex)?;
            run_verify(public_key, &message, signature)?;
        }
        Commands::Info => {
            show_info(&cli)?;
        }
    }

    Ok(())
}

impl Cli {
    fn participant_id(&self) -> Result<ParticipantId> {
        self.participant_id
            .context("--participant-id (or PARTICIPANT_ID) is required")
    }

    fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            round_timeout: Duration::from_secs(self.round_timeout),
            dkg_fault_policy: self.dkg_fault_policy,
            exclusion_policy: self.exclusion_policy,
        }
    }

    fn coordinator(&self) -> Result<Coordinator<RelayClient>> {
        let relay = RelayClient::new(&self.relay);
        Ok(Coordinator::new(
            self.participant_id()?,
            relay,
            self.protocol_config(),
        ))
    }

    fn key_share_path(&self) -> Result<PathBuf> {
        Ok(self
            .dest
            .join(format!("keyshare.{}.json", self.participant_id()?)))
    }

    fn session_log_path(&self) -> Result<PathBuf> {
        Ok(self
            .dest
            .join(format!("sessions.{}.txt", self.participant_id()?)))
    }
}

async fn run_keygen(cli: &Cli, n: usize, t: usize, session: &str) -> Result<()> {
    let participants: Vec<ParticipantId> = (1..=n as ParticipantId).collect();
    let node = cli.coordinator()?;
    let session_id = session_id_from_label(session);
    std::fs::create_dir_all(&cli.dest)?;
    claim_session(&cli.session_log_path()?, &session_id)?;

    info!(
        participant_id = node.participant_id(),
        n_parties = n,
        threshold = t,
        session,
        "Starting DKG"
    );

    let output = node.start_dkg(session_id, &participants, t).await?;
    for fault in &output.faults {
        info!(culprit = fault.participant, kind = ?fault.kind, "Dealer excluded");
    }

    // Save key share
    let path = cli.key_share_path()?;
    write_key_share(&path, &output.key_share)?;

    info!(
        public_key = %output.key_share.group_public_key.to_hex(),
        path = ?path,
        "DKG completed, key share saved"
    );

    // Print public key
    println!("Public Key: {}", output.key_share.group_public_key.to_hex());

    Ok(())
}

async fn run_sign(cli: &Cli, message: &[u8], signers: &str, session: &str) -> Result<()> {
    let key_share = load_key_share(&cli.key_share_path()?)?;
    let signers = parse_ids(signers)?;
    let node = cli.coordinator()?;
    let session_id = session_id_from_label(session);
    claim_session(&cli.session_log_path()?, &session_id)?;

    info!(
        participant_id = node.participant_id(),
        signers = ?signers,
        session,
        "Starting signing"
    );

    let signature = node
        .start_signing(session_id, &key_share, &signers, message)
        .await?;

    info!(signature = %signature.to_hex(), "Signature generated");

    // Print signature
    println!("Signature: {}", signature.to_hex());
    println!("  R: {}", hex::encode(tfrost_core::curve::point_to_bytes(signature.r())));
    println!("  z: {}", hex::encode(tfrost_core::curve::scalar_to_bytes(signature.z())));

    Ok(())
}

fn run_verify(public_key: &str, message: &[u8], signature: &str) -> Result<()> {
    let public_key = GroupPublicKey::from_bytes(&hex::decode(public_key)?)?;
    let signature = Signature::from_bytes(&hex::decode(signature)?)?;

    if verify(&public_key, message, &signature) {
        println!("Signature valid");
        Ok(())
    } else {
        bail!("Signature invalid")
    }
}

fn show_info(cli: &Cli) -> Result<()> {
    let key_share = load_key_share(&cli.key_share_path()?)?;

    println!("Key Share Info:");
    println!("  Participant ID: {}", key_share.participant_id);
    println!("  Participants: {:?}", key_share.participants);
    println!("  Threshold: {}", key_share.threshold);
    println!("  Public Key: {}", key_share.group_public_key.to_hex());
    println!("  Core Version: {}", tfrost_core::VERSION);

    Ok(())
}

fn parse_ids(list: &str) -> Result<Vec<ParticipantId>> {
    list.split(',')
        .map(|s| {
            s.trim()
                .parse::<ParticipantId>()
                .with_context(|| format!("invalid participant id: {:?}", s))
        })
        .collect()
}

fn parse_message(message: &str, is_hex: bool) -> Result<Vec<u8>> {
    if is_hex {
        Ok(hex::decode(message.trim_start_matches("0x"))?)
    } else {
        Ok(message.as_bytes().to_vec())
    }
}

/// Record `session_id` as used in the log at `path`
///
/// Fails if the log already holds it; a session ID is never run twice.
fn claim_session(path: &Path, session_id: &SessionId) -> Result<()> {
    use std::io::Write;

    let entry = hex::encode(session_id);
    match std::fs::read_to_string(path) {
        Ok(log) => {
            if log.lines().any(|line| line.trim() == entry) {
                bail!("session {} was already used by this party", entry);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("cannot read session log {}", path.display()))
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open session log {}", path.display()))?;
    writeln!(file, "{}", entry)?;
    Ok(())
}

/// Write the key share readable by its owner only
fn write_key_share(path: &Path, key_share: &KeyShare) -> Result<()> {
    use std::io::Write;

    let json = Zeroizing::new(serde_json::to_vec_pretty(key_share)?);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    file.write_all(&json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn load_key_share(path: &Path) -> Result<KeyShare> {
    let json = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("cannot read key share {}", path.display()))?,
    );
    let key_share: KeyShare = serde_json::from_str(&json)?;
    Ok(key_share)
}
