//! RADOS command-line tool
//!
//! Object, pool, snapshot and admin operations on top of `radosclient`.

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use radosclient::{
    default_backend, AdminCommand, ClientSettings, ClusterHandle, CompletionState, PgId,
    PoolContext,
};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant, UNIX_EPOCH};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rados")]
#[command(about = "RADOS object storage client", long_about = None)]
struct Cli {
    /// Pool to operate on
    #[arg(short, long)]
    pool: Option<String>,

    /// Ceph configuration file path
    #[arg(short = 'c', long, env = "CEPH_CONF")]
    conf: Option<PathBuf>,

    /// Monitor addresses (comma-separated); overrides the configuration file
    #[arg(long, env = "MON_HOST")]
    mon_host: Option<String>,

    /// Cluster name
    #[arg(long, default_value = "ceph")]
    cluster: String,

    /// Entity name
    #[arg(long, default_value = "client.admin")]
    name: String,

    /// Extra configuration option (key=value), may be repeated
    #[arg(long = "set", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Seconds to wait for asynchronous operations
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write object from file or stdin
    Put {
        /// Object name
        object: String,
        /// Input file ("-" for stdin)
        file: String,
        /// Write at this offset instead of replacing the object
        #[arg(long)]
        offset: Option<u64>,
    },
    /// Append file or stdin to an object
    Append {
        object: String,
        file: String,
    },
    /// Read object to file or stdout
    Get {
        /// Object name
        object: String,
        /// Output file ("-" for stdout)
        file: String,
    },
    /// Get object statistics
    Stat {
        /// Object name
        object: String,
    },
    /// Remove object
    Rm {
        /// Object name
        object: String,
    },
    /// List objects in pool
    Ls,
    /// Set an extended attribute
    Setxattr {
        object: String,
        attr: String,
        value: String,
    },
    /// Print an extended attribute
    Getxattr {
        object: String,
        attr: String,
        /// Largest value to accept
        #[arg(long, default_value = "65536")]
        max_size: usize,
    },
    /// Remove an extended attribute
    Rmxattr {
        object: String,
        attr: String,
    },
    /// Create a pool snapshot
    Mksnap { snap: String },
    /// Remove a pool snapshot
    Rmsnap { snap: String },
    /// List pool snapshots
    Lssnap,
    /// Roll an object back to a snapshot
    Rollback { object: String, snap: String },
    /// List pools
    Lspools,
    /// Create a pool
    Mkpool { pool: String },
    /// Delete a pool
    Rmpool { pool: String },
    /// Show cluster usage
    Df,
    /// Show the native library version
    Version,
    /// Send a JSON command to the monitors
    MonCommand {
        /// Command document, e.g. '{"prefix": "status"}'
        cmd: String,
        /// File whose contents are sent as the input buffer
        #[arg(long)]
        input: Option<String>,
    },
    /// Send a JSON command to one OSD
    OsdCommand { osd: i32, cmd: String },
    /// Send a JSON command to a placement group, e.g. 1.a
    PgCommand { pgid: String, cmd: String },
    /// Write objects asynchronously and report throughput
    Bench {
        /// Number of objects to write
        #[arg(long, default_value = "64")]
        count: usize,
        /// Object size in bytes
        #[arg(long, default_value = "4096")]
        size: usize,
        /// Writes in flight at once
        #[arg(long, default_value = "16")]
        concurrency: usize,
        /// Remove the objects afterwards
        #[arg(long)]
        cleanup: bool,
    },
}

impl Commands {
    fn needs_pool(&self) -> bool {
        !matches!(
            self,
            Commands::Lspools
                | Commands::Mkpool { .. }
                | Commands::Rmpool { .. }
                | Commands::Df
                | Commands::Version
                | Commands::MonCommand { .. }
                | Commands::OsdCommand { .. }
                | Commands::PgCommand { .. }
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = settings_from_cli(&cli)?;
    let native = default_backend().context("Failed to start RADOS backend")?;

    if let Commands::Version = cli.command {
        let cluster = ClusterHandle::new(native);
        println!("librados version {}", cluster.version());
        return Ok(());
    }

    let mut cluster =
        ClusterHandle::connect_with(native, &settings).context("Failed to connect to cluster")?;
    info!("Connected to cluster {} as {}", cluster.cluster_name(), cluster.user_name());

    if cli.command.needs_pool() {
        let pool_name = settings
            .pool
            .as_deref()
            .ok_or_else(|| anyhow!("This command needs --pool"))?;
        let mut pool = cluster
            .open_pool(pool_name)
            .with_context(|| format!("Failed to open pool {}", pool_name))?;
        run_pool_command(&cli, &pool)?;
        pool.close().context("Failed to close pool")?;
    } else {
        run_cluster_command(&cli, &cluster)?;
    }

    cluster.shutdown().context("Failed to shut down")?;
    Ok(())
}

fn settings_from_cli(cli: &Cli) -> Result<ClientSettings> {
    let mut settings = ClientSettings {
        cluster_name: cli.cluster.clone(),
        user_name: cli.name.clone(),
        conf_path: cli.conf.clone().filter(|p| p.exists()),
        pool: cli.pool.clone(),
        ..Default::default()
    };
    if let Some(path) = &cli.conf {
        if settings.conf_path.is_none() {
            debug!("Configuration file not found: {}", path.display());
        }
    }
    if let Some(mon_host) = &cli.mon_host {
        settings.options.insert("mon_host".into(), mon_host.clone());
    }
    for option in &cli.options {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", option))?;
        settings
            .options
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(settings)
}

fn run_pool_command(cli: &Cli, pool: &PoolContext<'_>) -> Result<()> {
    let timeout = Duration::from_secs(cli.timeout);
    match &cli.command {
        Commands::Put {
            object,
            file,
            offset,
        } => {
            let data = read_input(file).context("Failed to read input")?;
            match offset {
                Some(offset) => pool.write(object, &data, *offset),
                None => pool.write_full(object, &data),
            }
            .context("Failed to write object")?;
            debug!("Wrote {} bytes to {}", data.len(), object);
        }
        Commands::Append { object, file } => {
            let data = read_input(file).context("Failed to read input")?;
            pool.append(object, &data).context("Failed to append")?;
        }
        Commands::Get { object, file } => {
            let data = pool.read_full(object).context("Failed to read object")?;
            write_output(file, &data).context("Failed to write output")?;
            debug!("Read {} bytes from {}", data.len(), object);
        }
        Commands::Stat { object } => {
            let stat = pool.stat(object).context("Failed to stat object")?;
            let mtime = stat
                .mtime
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            println!("{}/{} mtime {} size {}", pool.name(), object, mtime, stat.size);
        }
        Commands::Rm { object } => {
            pool.remove(object).context("Failed to delete object")?;
        }
        Commands::Ls => {
            for obj in pool.list_objects().context("Failed to list objects")? {
                println!("{}", obj);
            }
        }
        Commands::Setxattr {
            object,
            attr,
            value,
        } => {
            pool.set_xattr(object, attr, value.as_bytes())
                .context("Failed to set attribute")?;
        }
        Commands::Getxattr {
            object,
            attr,
            max_size,
        } => {
            let value = pool
                .get_xattr(object, attr, *max_size)
                .context("Failed to get attribute")?;
            write_output("-", &value)?;
            println!();
        }
        Commands::Rmxattr { object, attr } => {
            pool.remove_xattr(object, attr)
                .context("Failed to remove attribute")?;
        }
        Commands::Mksnap { snap } => {
            let id = pool.snapshots().create(snap).context("Failed to create snapshot")?;
            println!("created pool {} snap {} ({})", pool.name(), snap, id);
        }
        Commands::Rmsnap { snap } => {
            pool.snapshots().remove(snap).context("Failed to remove snapshot")?;
            println!("removed pool {} snap {}", pool.name(), snap);
        }
        Commands::Lssnap => {
            let snaps = pool.snapshots().list().context("Failed to list snapshots")?;
            for snap in &snaps {
                let stamp = snap
                    .timestamp
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                println!("{}\t{}\t{}", snap.id, snap.name, stamp);
            }
            println!("{} snaps", snaps.len());
        }
        Commands::Rollback { object, snap } => {
            pool.snapshots()
                .rollback(snap, object)
                .context("Failed to roll back")?;
            println!("rolled back pool {} to snapshot {}", pool.name(), snap);
        }
        Commands::Bench {
            count,
            size,
            concurrency,
            cleanup,
        } => bench(pool, *count, *size, *concurrency, *cleanup, timeout)?,
        _ => bail!("Not a pool command"),
    }
    Ok(())
}

fn run_cluster_command(cli: &Cli, cluster: &ClusterHandle) -> Result<()> {
    let admin = cluster.admin();
    match &cli.command {
        Commands::Lspools => {
            for pool in cluster.pool_list().context("Failed to list pools")? {
                println!("{}", pool);
            }
        }
        Commands::Mkpool { pool } => {
            cluster.pool_create(pool).context("Failed to create pool")?;
            println!("successfully created pool {}", pool);
        }
        Commands::Rmpool { pool } => {
            cluster.pool_delete(pool).context("Failed to delete pool")?;
            println!("successfully deleted pool {}", pool);
        }
        Commands::Df => {
            let stat = cluster.stat().context("Failed to stat cluster")?;
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        Commands::MonCommand { cmd, input } => {
            let inbuf = match input {
                Some(file) => read_input(file)?,
                None => Bytes::new(),
            };
            let reply = admin.mon_command(cmd.as_str(), &inbuf)?;
            print_reply(&reply.data, &reply.status_message)?;
        }
        Commands::OsdCommand { osd, cmd } => {
            let reply = admin.osd_command(*osd, cmd.as_str(), &[])?;
            print_reply(&reply.data, &reply.status_message)?;
        }
        Commands::PgCommand { pgid, cmd } => {
            let pg: PgId = pgid.parse()?;
            let reply = admin.pg_command(pg, AdminCommand::from(cmd.as_str()), &[])?;
            print_reply(&reply.data, &reply.status_message)?;
        }
        _ => bail!("Not a cluster command"),
    }
    Ok(())
}

fn print_reply(data: &[u8], status: &str) -> Result<()> {
    if !status.is_empty() {
        eprintln!("{}", status);
    }
    write_output("-", data)?;
    if !data.is_empty() {
        println!();
    }
    Ok(())
}

/// Keep `concurrency` writes in flight until `count` objects are written
fn bench(
    pool: &PoolContext<'_>,
    count: usize,
    size: usize,
    concurrency: usize,
    cleanup: bool,
    timeout: Duration,
) -> Result<()> {
    if concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }
    let payload = Bytes::from(vec![0x5a; size]);
    let started = Instant::now();

    let mut written = 0;
    while written < count {
        let batch = concurrency.min(count - written);
        let handles = (written..written + batch)
            .map(|i| pool.aio_write_full(&format!("bench_{}", i), payload.clone()))
            .collect::<radosclient::Result<Vec<_>>>()?;
        for handle in &handles {
            let state = handle.wait_for_durable(timeout)?;
            if let CompletionState::Failed(code) = state {
                bail!(
                    "Write to {} failed: {}",
                    handle.object(),
                    radosclient::errno_message(code)
                );
            }
        }
        written += batch;
    }

    let elapsed = started.elapsed();
    let bytes = (count * size) as f64;
    println!(
        "wrote {} objects of {} bytes in {:.3}s ({:.2} MB/s)",
        count,
        size,
        elapsed.as_secs_f64(),
        bytes / elapsed.as_secs_f64().max(1e-9) / (1024.0 * 1024.0)
    );

    if cleanup {
        for i in 0..count {
            pool.remove(&format!("bench_{}", i))?;
        }
    }
    Ok(())
}

/// Read input from file or stdin
fn read_input(file: &str) -> Result<Bytes> {
    let data = if file == "-" {
        let mut buffer = Vec::new();
        io::stdin()
            .read_to_end(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        std::fs::read(file).context(format!("Failed to read file: {}", file))?
    };

    Ok(Bytes::from(data))
}

/// Write output to file or stdout
fn write_output(file: &str, data: &[u8]) -> Result<()> {
    if file == "-" {
        io::stdout()
            .write_all(data)
            .context("Failed to write to stdout")?;
        io::stdout().flush().context("Failed to flush stdout")?;
    } else {
        std::fs::write(file, data).context(format!("Failed to write file: {}", file))?;
    }

    Ok(())
}
