use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhcpwarden::{
    AllocationEngine, Assignment, Cidr, Config, ConfigSynthesizer, Datastore, Error,
    LeaseLifecycleManager, LeaseStore, LeaseTime, MacAddr, Pool, PoolRegistry, Reservation,
    ReservationStore, Result,
};

#[derive(Parser)]
#[command(name = "dhcpwarden")]
#[command(author, version, about = "Pool, lease, and daemon-config management for the appliance DHCP service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "settings.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved appliance settings.
    ShowConfig,
    /// Manage address pools.
    #[command(subcommand)]
    Pool(PoolCommands),
    /// Manage static reservations.
    #[command(subcommand)]
    Reservation(ReservationCommands),
    /// List lease rows.
    Leases,
    /// Release the active lease held by a MAC.
    Release { mac: MacAddr },
    /// Extend an active lease.
    Renew {
        lease_id: i64,
        /// Duration text such as "12 hours"; defaults to the pool's.
        #[arg(long)]
        duration: Option<String>,
    },
    /// Assign an address to a MAC from a pool.
    Allocate { mac: MacAddr, pool_id: i64 },
    /// Show the next address allocation would hand out.
    NextIp { pool_id: i64 },
    /// Sweep expired leases.
    Cleanup,
    /// Per-pool utilization.
    Stats,
    /// Render and write the daemon configuration files.
    Apply,
}

#[derive(Subcommand)]
enum PoolCommands {
    List,
    Add(PoolAdd),
    Update(PoolUpdate),
    Remove { id: i64 },
}

#[derive(Args)]
struct PoolAdd {
    #[arg(long)]
    name: String,
    #[arg(long)]
    vlan: u16,
    #[arg(long)]
    network: Cidr,
    #[arg(long)]
    start: Ipv4Addr,
    #[arg(long)]
    end: Ipv4Addr,
    #[arg(long)]
    gateway: Ipv4Addr,
    #[arg(long = "dns", required = true)]
    dns_servers: Vec<Ipv4Addr>,
    #[arg(long, default_value = "24 hours")]
    lease_time: String,
    #[arg(long, default_value = "7 days")]
    max_lease_time: String,
    /// Restrict the pool to clients with a reservation.
    #[arg(long)]
    known_clients_only: bool,
    #[arg(long)]
    require_authorization: bool,
    /// Create the pool without making it allocation-eligible.
    #[arg(long)]
    inactive: bool,
}

#[derive(Args)]
struct PoolUpdate {
    id: i64,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    vlan: Option<u16>,
    #[arg(long)]
    network: Option<Cidr>,
    #[arg(long)]
    start: Option<Ipv4Addr>,
    #[arg(long)]
    end: Option<Ipv4Addr>,
    #[arg(long)]
    gateway: Option<Ipv4Addr>,
    #[arg(long = "dns")]
    dns_servers: Vec<Ipv4Addr>,
    #[arg(long)]
    lease_time: Option<String>,
    #[arg(long)]
    max_lease_time: Option<String>,
    #[arg(long)]
    active: Option<bool>,
    #[arg(long)]
    allow_unknown_clients: Option<bool>,
    #[arg(long)]
    require_authorization: Option<bool>,
}

#[derive(Subcommand)]
enum ReservationCommands {
    List,
    Add(ReservationAdd),
    Remove { id: i64 },
}

#[derive(Args)]
struct ReservationAdd {
    #[arg(long)]
    mac: MacAddr,
    #[arg(long)]
    ip: Ipv4Addr,
    #[arg(long)]
    pool_id: Option<i64>,
    #[arg(long)]
    hostname: Option<String>,
    #[arg(long)]
    lease_time: Option<String>,
}

struct Services {
    pools: PoolRegistry,
    leases: LeaseStore,
    reservations: ReservationStore,
    engine: AllocationEngine,
    lifecycle: LeaseLifecycleManager,
    synthesizer: ConfigSynthesizer,
}

async fn build_services(config: Arc<Config>) -> Result<Services> {
    let store = Arc::new(Datastore::open(&config.datastore_file).await?);

    let pools = PoolRegistry::new(Arc::clone(&store));
    let leases = LeaseStore::new(Arc::clone(&store));
    let reservations = ReservationStore::new(Arc::clone(&store));
    let engine = AllocationEngine::new(pools.clone(), leases.clone(), reservations.clone());
    let lifecycle = LeaseLifecycleManager::new(
        pools.clone(),
        leases.clone(),
        engine.clone(),
        config.default_lease_time.clone(),
    );
    let synthesizer = ConfigSynthesizer::new(Arc::clone(&config), Arc::clone(&store));

    Ok(Services {
        pools,
        leases,
        reservations,
        engine,
        lifecycle,
        synthesizer,
    })
}

async fn write_atomically(path: &str, content: &str) -> Result<()> {
    let path = PathBuf::from(path);
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, content).await?;
    tokio::fs::rename(&tmp_path, &path).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Arc::new(Config::load_or_create(&cli.config)?);
    let services = build_services(Arc::clone(&config)).await?;

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(config.as_ref())?);
        }
        Commands::Pool(command) => run_pool_command(&services, command).await?,
        Commands::Reservation(command) => run_reservation_command(&services, command).await?,
        Commands::Leases => {
            let leases = services.leases.list().await;
            if leases.is_empty() {
                println!("No leases.");
                return Ok(());
            }
            let now = chrono::Utc::now();
            println!(
                "{:<6} {:<18} {:<16} {:<6} {:<10} {:<24} {:<10}",
                "ID", "MAC", "IP Address", "Pool", "State", "Expires At", "Remaining"
            );
            println!("{}", "-".repeat(96));
            for lease in leases {
                let pool = lease
                    .pool_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let remaining = lease.remaining_seconds(now);
                let remaining_text = if remaining > 0 {
                    format!("{remaining}s")
                } else {
                    "lapsed".to_string()
                };
                println!(
                    "{:<6} {:<18} {:<16} {:<6} {:<10} {:<24} {:<10}",
                    lease.id,
                    lease.mac.to_string(),
                    lease.ip.to_string(),
                    pool,
                    lease.state.to_string(),
                    lease.ends_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    remaining_text
                );
            }
        }
        Commands::Release { mac } => match services.lifecycle.release(mac).await? {
            Some(lease) => println!("Released {} from {}.", lease.ip, lease.mac),
            None => println!("No active lease for {mac}; nothing to do."),
        },
        Commands::Renew { lease_id, duration } => {
            let duration = duration.as_deref().map(LeaseTime::parse);
            let lease = services.lifecycle.renew(lease_id, duration).await?;
            println!(
                "Lease {} for {} renewed until {} (renewal #{}).",
                lease.id,
                lease.mac,
                lease.ends_at.format("%Y-%m-%d %H:%M:%S UTC"),
                lease.renewal_count
            );
        }
        Commands::Allocate { mac, pool_id } => {
            match services.lifecycle.allocate(mac, pool_id).await {
                Ok(Assignment::Leased(lease)) => {
                    println!(
                        "Leased {} to {} until {}.",
                        lease.ip,
                        lease.mac,
                        lease.ends_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                Ok(Assignment::Reserved(reservation)) => {
                    println!(
                        "{} is statically reserved {}; no dynamic lease needed.",
                        reservation.mac, reservation.ip
                    );
                }
                Err(Error::PoolExhausted { pool }) => {
                    println!("Pool '{pool}' is full; no address available.");
                }
                Err(error) => return Err(error),
            }
        }
        Commands::NextIp { pool_id } => match services.engine.next_free_address(pool_id).await {
            Ok(ip) => println!("{ip}"),
            Err(Error::PoolExhausted { pool }) => {
                println!("Pool '{pool}' is full; no address available.");
            }
            Err(error) => return Err(error),
        },
        Commands::Cleanup => {
            let report = services.lifecycle.sweep_expired().await?;
            println!("Expired {} lease(s).", report.expired);
            if !report.skipped.is_empty() {
                println!("Skipped stale lease rows: {:?}", report.skipped);
            }
        }
        Commands::Stats => {
            let stats = services.engine.stats().await;
            if stats.is_empty() {
                println!("No pools configured.");
                return Ok(());
            }
            println!(
                "{:<6} {:<16} {:<6} {:>8} {:>8} {:>10} {:>8}",
                "ID", "Pool", "VLAN", "Size", "Leased", "Reserved", "Free"
            );
            println!("{}", "-".repeat(68));
            for entry in stats {
                println!(
                    "{:<6} {:<16} {:<6} {:>8} {:>8} {:>10} {:>8}",
                    entry.pool_id,
                    entry.name,
                    entry.vlan,
                    entry.size,
                    entry.active_leases,
                    entry.reservations,
                    entry.free
                );
            }
        }
        Commands::Apply => {
            let dhcp_document = services.synthesizer.render_dhcp().await?;
            let dns_document = services.synthesizer.render_dns().await?;

            write_atomically(&config.dhcp_config_file, &dhcp_document).await?;
            write_atomically(&config.dns_config_file, &dns_document).await?;

            info!(
                "applied configuration to {} and {}",
                config.dhcp_config_file, config.dns_config_file
            );
            println!("Wrote {} and {}.", config.dhcp_config_file, config.dns_config_file);
        }
    }

    Ok(())
}

async fn run_pool_command(services: &Services, command: PoolCommands) -> Result<()> {
    match command {
        PoolCommands::List => {
            let pools = services.pools.list().await;
            if pools.is_empty() {
                println!("No pools configured.");
                return Ok(());
            }
            println!(
                "{:<6} {:<16} {:<6} {:<18} {:<32} {:<8}",
                "ID", "Name", "VLAN", "Network", "Range", "Active"
            );
            println!("{}", "-".repeat(88));
            for pool in pools {
                println!(
                    "{:<6} {:<16} {:<6} {:<18} {:<32} {:<8}",
                    pool.id,
                    pool.name,
                    pool.vlan,
                    pool.network.to_string(),
                    pool.range_display(),
                    pool.active
                );
            }
        }
        PoolCommands::Add(add) => {
            let pool = services
                .pools
                .add(Pool {
                    id: 0,
                    name: add.name,
                    vlan: add.vlan,
                    network: add.network,
                    range_start: add.start,
                    range_end: add.end,
                    gateway: add.gateway,
                    dns_servers: add.dns_servers,
                    lease_time: LeaseTime::parse(&add.lease_time),
                    max_lease_time: LeaseTime::parse(&add.max_lease_time),
                    active: !add.inactive,
                    allow_unknown_clients: !add.known_clients_only,
                    require_authorization: add.require_authorization,
                })
                .await?;
            println!("Added pool '{}' with id {}.", pool.name, pool.id);
        }
        PoolCommands::Update(update) => {
            let mut pool = services.pools.get(update.id).await?;
            if let Some(name) = update.name {
                pool.name = name;
            }
            if let Some(vlan) = update.vlan {
                pool.vlan = vlan;
            }
            if let Some(network) = update.network {
                pool.network = network;
            }
            if let Some(start) = update.start {
                pool.range_start = start;
            }
            if let Some(end) = update.end {
                pool.range_end = end;
            }
            if let Some(gateway) = update.gateway {
                pool.gateway = gateway;
            }
            if !update.dns_servers.is_empty() {
                pool.dns_servers = update.dns_servers;
            }
            if let Some(lease_time) = update.lease_time {
                pool.lease_time = LeaseTime::parse(&lease_time);
            }
            if let Some(max_lease_time) = update.max_lease_time {
                pool.max_lease_time = LeaseTime::parse(&max_lease_time);
            }
            if let Some(active) = update.active {
                pool.active = active;
            }
            if let Some(allow) = update.allow_unknown_clients {
                pool.allow_unknown_clients = allow;
            }
            if let Some(require) = update.require_authorization {
                pool.require_authorization = require;
            }
            let pool = services.pools.update(update.id, pool).await?;
            println!("Updated pool '{}' (id {}).", pool.name, pool.id);
        }
        PoolCommands::Remove { id } => {
            services.pools.remove(id).await?;
            println!("Removed pool {id}.");
        }
    }
    Ok(())
}

async fn run_reservation_command(services: &Services, command: ReservationCommands) -> Result<()> {
    match command {
        ReservationCommands::List => {
            let reservations = services.reservations.list().await;
            if reservations.is_empty() {
                println!("No reservations.");
                return Ok(());
            }
            println!(
                "{:<6} {:<18} {:<16} {:<6} {:<16} {:<8}",
                "ID", "MAC", "IP Address", "Pool", "Hostname", "Active"
            );
            println!("{}", "-".repeat(72));
            for reservation in reservations {
                let pool = reservation
                    .pool_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<6} {:<18} {:<16} {:<6} {:<16} {:<8}",
                    reservation.id,
                    reservation.mac.to_string(),
                    reservation.ip.to_string(),
                    pool,
                    reservation.hostname.as_deref().unwrap_or("-"),
                    reservation.active
                );
            }
        }
        ReservationCommands::Add(add) => {
            let reservation = services
                .reservations
                .add(Reservation {
                    id: 0,
                    mac: add.mac,
                    ip: add.ip,
                    pool_id: add.pool_id,
                    hostname: add.hostname,
                    lease_time: add.lease_time.as_deref().map(LeaseTime::parse),
                    active: true,
                })
                .await?;
            println!(
                "Added reservation {} -> {} with id {}.",
                reservation.mac, reservation.ip, reservation.id
            );
        }
        ReservationCommands::Remove { id } => {
            services.reservations.remove(id).await?;
            println!("Removed reservation {id}.");
        }
    }
    Ok(())
}
