use distributed_fs::membership::service::{MembershipService, SlotConfig};
use distributed_fs::membership::types::{Endpoints, Membership, NodeId};
use distributed_fs::node::{
    DeleteOutcome, GetOutcome, NodeConfig, NodeSockets, PutOutcome, RequireConfirmation,
    StorageNode,
};
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

const CONTROL_PORT_OFFSET: u16 = 1000;
const TRANSFER_PORT_OFFSET: u16 = 2000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 5 {
        eprintln!(
            "Usage: {} --id <n> --node <id>=<host:port>... [--introducer <id>] [--storage <dir>]",
            args[0]
        );
        eprintln!(
            "Example: {} --id 2 --node 1=127.0.0.1:5001 --node 2=127.0.0.1:5002 --introducer 1",
            args[0]
        );
        std::process::exit(1);
    }

    let mut local_id: Option<NodeId> = None;
    let mut slots: Vec<SlotConfig> = vec![];
    let mut introducer: Option<NodeId> = None;
    let mut storage: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--id", Some(v)) => {
                local_id = Some(NodeId(v.parse()?));
                i += 2;
            }
            ("--node", Some(v)) => {
                slots.push(parse_slot(v)?);
                i += 2;
            }
            ("--introducer", Some(v)) => {
                introducer = Some(NodeId(v.parse()?));
                i += 2;
            }
            ("--storage", Some(v)) => {
                storage = Some(PathBuf::from(v));
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let local_id = local_id.ok_or_else(|| anyhow::anyhow!("--id is required"))?;
    slots.sort_by_key(|slot| slot.id);

    let local = slots
        .iter()
        .find(|slot| slot.id == local_id)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("--node entry for slot {} is missing", local_id))?;

    tracing::info!(
        "Starting slot {} of {} (gossip={}, control={}, transfer={})",
        local_id,
        slots.len(),
        local.gossip_addr,
        local.endpoints.control,
        local.endpoints.transfer
    );

    // 1. Membership (UDP gossip):
    let membership = MembershipService::new(local_id, slots).await?;
    let service = membership.clone();
    tokio::spawn(async move {
        service.start().await;
    });

    // 2. Storage node:
    let sockets = NodeSockets::bind(local.endpoints.control, local.endpoints.transfer).await?;
    let storage = storage.unwrap_or_else(|| PathBuf::from(format!("storage-{}", local_id)));
    let config = NodeConfig::default().with_storage_dir(storage);

    let node = StorageNode::new(config, membership.clone(), sockets)?
        .with_conflict_policy(RequireConfirmation::with_confirmer(confirm_overwrite));
    let node = Arc::new(node);
    node.start().await?;

    // 3. Enter the group:
    match introducer {
        Some(introducer) if introducer != local_id => membership.join(introducer).await?,
        _ => membership.bootstrap().await,
    }

    // 4. Spawn stats reporter:
    let stats_service = membership.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));

        loop {
            interval.tick().await;
            let alive = stats_service.get_alive_members();
            tracing::info!("Cluster stats: {} alive slots", alive.len());
        }
    });

    // 5. Console:
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || console(handle, node, membership, introducer)).await?;

    Ok(())
}

/// Parses `<id>=<host:port>`. The control and transfer ports sit at fixed
/// offsets from the gossip port.
fn parse_slot(arg: &str) -> anyhow::Result<SlotConfig> {
    let (id, addr) = arg
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected <id>=<host:port>, got {}", arg))?;
    let id = NodeId(id.parse()?);
    let gossip_addr: SocketAddr = addr.parse()?;

    let offset = |delta: u16| -> anyhow::Result<SocketAddr> {
        let port = gossip_addr
            .port()
            .checked_add(delta)
            .ok_or_else(|| anyhow::anyhow!("Port of slot {} is too high", id))?;
        Ok(SocketAddr::new(gossip_addr.ip(), port))
    };

    Ok(SlotConfig {
        id,
        gossip_addr,
        endpoints: Endpoints {
            control: offset(CONTROL_PORT_OFFSET)?,
            transfer: offset(TRANSFER_PORT_OFFSET)?,
        },
    })
}

fn confirm_overwrite(name: &str, observed: i64, now: i64) -> bool {
    print!(
        "{} was written {} ms ago. Overwrite? [y/N] ",
        name,
        now - observed
    );
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

fn console(
    handle: Handle,
    node: Arc<StorageNode>,
    membership: Arc<MembershipService>,
    introducer: Option<NodeId>,
) {
    println!("Commands: put <local> <name> | get <name> <local> | delete <name> | ls <name> | store");
    println!("          join | leave | list_mem | list_self | exit");

    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to read console input: {}", e);
                break;
            }
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["put", local, name] => match handle.block_on(node.put(local, name)) {
                Ok(PutOutcome::Committed {
                    replicas,
                    timestamp,
                    ..
                }) => println!("Stored {} on {:?} (ts={})", name, replicas, timestamp),
                Ok(PutOutcome::Aborted) => println!("Put of {} aborted", name),
                Err(e) => println!("Put failed: {}", e),
            },
            ["get", name, local] => match handle.block_on(node.get(name, local)) {
                Ok(GetOutcome::Local(path)) => println!("Local replica at {}", path.display()),
                Ok(GetOutcome::Fetched { from, path, .. }) => {
                    println!("Fetched from slot {} into {}", from, path.display())
                }
                Ok(GetOutcome::NotFound) => println!("{} not found", name),
                Err(e) => println!("Get failed: {}", e),
            },
            ["delete", name] => match handle.block_on(node.delete(name)) {
                Ok(DeleteOutcome::Deleted) => println!("Deleted {}", name),
                Ok(DeleteOutcome::NotFound) => println!("{} not found", name),
                Err(e) => println!("Delete failed: {}", e),
            },
            ["ls", name] => match node.list_replicas(name) {
                Some(replicas) => {
                    for id in replicas {
                        match membership.endpoints(id) {
                            Some(ep) => println!("  slot {} control={} transfer={}", id, ep.control, ep.transfer),
                            None => println!("  slot {}", id),
                        }
                    }
                }
                None => println!("{} not found", name),
            },
            ["store"] => {
                for name in node.list_local() {
                    println!("  {}", name);
                }
            }
            ["join"] => {
                handle.block_on(node.clear_local_state());
                let joined = match introducer {
                    Some(introducer) if introducer != membership.local_id => {
                        handle.block_on(membership.join(introducer))
                    }
                    _ => {
                        handle.block_on(membership.bootstrap());
                        Ok(())
                    }
                };
                if let Err(e) = joined {
                    println!("Join failed: {}", e);
                }
            }
            ["leave"] => handle.block_on(membership.leave()),
            ["list_mem"] => {
                for member in membership.list_members() {
                    println!(
                        "  slot {} gossip={} control={} {:?} (inc={})",
                        member.id,
                        member.gossip_addr,
                        member.endpoints.control,
                        member.state,
                        member.incarnation
                    );
                }
            }
            ["list_self"] => println!(
                "  slot {} control={} alive={}",
                membership.local_id,
                node.control_addr(),
                membership.is_local_alive()
            ),
            ["exit"] => break,
            [] => {}
            _ => println!("Unknown command: {}", line.trim()),
        }
    }

    node.shutdown();
}
