use std::io::BufRead;
use std::sync::Arc;

use listsync::config::SyncConfig;
use listsync::core::identity::Identity;
use listsync::remote::http::GraphQlClient;
use listsync::sync::clock::SystemClock;
use listsync::sync::paginate::PageCap;
use listsync::sync::persist::FileStorage;
use listsync::sync::seed::{CURRENT_SEED_VERSION, SeedOutcome};
use listsync::sync::{Session, keyring};

struct FilteredJournal {
    inner: systemd_journal_logger::JournalLog,
}

impl log::Log for FilteredJournal {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if metadata.target().starts_with("listsync") {
            let max = if listsync::debug_logging() { log::LevelFilter::Debug } else { log::LevelFilter::Info };
            metadata.level() <= max
        } else {
            metadata.level() <= log::LevelFilter::Warn
        }
    }
    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }
    fn flush(&self) {
        self.inner.flush();
    }
}

#[derive(Debug, Default)]
struct Args {
    subject: Option<String>,
    groups: Vec<String>,
    admin: bool,
    max_items: Option<usize>,
    store_token: bool,
    sign_out: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--subject" => args.subject = Some(iter.next().ok_or("--subject needs a value")?),
            "--group" => args.groups.push(iter.next().ok_or("--group needs a value")?),
            "--admin" => args.admin = true,
            "--max-items" => {
                let value = iter.next().ok_or("--max-items needs a value")?;
                args.max_items = Some(value.parse().map_err(|_| format!("invalid --max-items {}", value))?);
            }
            "--store-token" => args.store_token = true,
            "--sign-out" => args.sign_out = true,
            other => return Err(format!("unknown argument {}", other)),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() {
    let config = SyncConfig::load_or_default();

    if let Ok(journal) = systemd_journal_logger::JournalLog::new() {
        let journal = journal.with_syslog_identifier("listsync-check".to_string());
        listsync::set_debug_logging(config.debug_logging);
        if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
            // Global max must be Debug so crate debug logs pass when toggled
            log::set_max_level(log::LevelFilter::Debug);
        }
    }

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("usage: listsync-check --subject ID [--group NAME]... [--admin] [--max-items N] [--store-token] [--sign-out]");
            std::process::exit(2);
        }
    };
    let Some(subject) = args.subject.clone() else {
        eprintln!("--subject is required");
        std::process::exit(2);
    };
    let identity = args
        .groups
        .iter()
        .fold(Identity::new(subject), |id, g| id.with_group(g.clone()));

    if !config.sync_ready() {
        println!("No API URL configured in {}", SyncConfig::config_path().display());
        return;
    }
    let api_url = config.api_url.trim();

    println!("=== listsync check: {} ===\n", api_url);

    if args.store_token {
        println!("Paste the API token and press enter:");
        let mut token = String::new();
        if let Err(e) = std::io::stdin().lock().read_line(&mut token) {
            println!("  Could not read token: {}", e);
            return;
        }
        match keyring::store_token(api_url, &identity.subject, token.trim()).await {
            Ok(()) => println!("  Token stored"),
            Err(e) => {
                println!("  Keyring error: {}", e);
                return;
            }
        }
    }

    let token = match keyring::load_token(api_url, &identity.subject).await {
        Ok(Some(token)) => token,
        Ok(None) => { println!("  No token found; run with --store-token"); return; }
        Err(e) => { println!("  Keyring error: {}", e); return; }
    };
    let client = match GraphQlClient::new(api_url, &token) {
        Ok(c) => c,
        Err(e) => { println!("  Client error: {}", e); return; }
    };

    let storage = FileStorage::new(config.snapshot_path(&identity));
    println!("Cache: {}", storage.path().display());
    let session = match Session::start(
        identity,
        &config,
        Arc::new(client),
        Arc::new(storage),
        Arc::new(SystemClock),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => { println!("  Session failed: {}", e); return; }
    };

    match session.seed_outcome() {
        Some(SeedOutcome::Seeded(counts)) => {
            println!("Demo data: created {} lists, {} tasks", counts.lists, counts.tasks)
        }
        Some(SeedOutcome::AlreadySeeded(v)) => println!("Demo data: seeded at v{}", v),
        Some(SeedOutcome::ClaimedElsewhere) => println!("Demo data: another session is seeding"),
        None => println!("Demo data: skipped"),
    }

    let view = session.view();
    println!(
        "Snapshot: {} lists, {} tasks ({:?})",
        view.snapshot.lists.len(),
        view.snapshot.tasks.len(),
        view.status
    );
    for d in &view.degraded {
        println!("  DEGRADED: {} records missing `{}`", d.type_name, d.field);
    }

    println!();
    for list in view.indexes.ordered_lists() {
        let marker = if Some(&list.id) == session.store().inbox_list_id().as_ref() { " (inbox)" } else { "" };
        println!("--- {}{} ---", list.name, marker);
        for (task, depth) in view.indexes.flatten_list(&list.id) {
            println!("  {}[{}] {}", "  ".repeat(depth), task.status.as_keyword(), task.title);
        }
    }

    if args.admin {
        let cap = args.max_items.map(PageCap::items).unwrap_or_default();
        println!("\n--- Admin: tasks ---");
        match session.scan_tasks(cap).await {
            Ok(report) => {
                println!("  Scanned: {} over {} page(s){}", report.scanned, report.pages, if report.capped { " (capped)" } else { "" });
                println!("  Hidden: {}", report.holes);
                for (owner, count) in &report.tasks_by_owner {
                    println!("    {}: {}", owner, count);
                }
                for d in &report.degraded {
                    println!("  DEGRADED: {} records missing `{}`", d.type_name, d.field);
                }
                if !report.inconsistent.is_empty() {
                    println!("\n  STATUS/COMPLETION MISMATCHES ({}):", report.inconsistent.len());
                    for id in &report.inconsistent {
                        println!("    {}", id);
                    }
                }
            }
            Err(e) => println!("  Error: {}", e),
        }

        println!("\n--- Admin: profiles ---");
        match session.profile_report(CURRENT_SEED_VERSION, cap).await {
            Ok(report) => {
                println!("  Seeded: {}, unseeded: {}", report.seeded, report.unseeded);
                if !report.claimed.is_empty() {
                    println!("\n  HOLDING SEED CLAIM ({}):", report.claimed.len());
                    for id in &report.claimed {
                        println!("    {}", id);
                    }
                }
            }
            Err(e) => println!("  Error: {}", e),
        }
    }

    if args.sign_out {
        println!("\n--- Sign out ---");
        let subject = session.identity().subject.clone();
        match session.sign_out().await {
            Ok(()) => println!("  Cached data cleared"),
            Err(e) => println!("  Could not clear cache: {}", e),
        }
        match keyring::delete_token(api_url, &subject).await {
            Ok(()) => println!("  Token removed"),
            Err(e) => println!("  Keyring error: {}", e),
        }
    }

    println!("\n=== Done ===");
}
