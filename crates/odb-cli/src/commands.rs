use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use odb_cache::BlockCache;
use odb_pack::{DeltaResolver, PackFile};
use odb_store::{DatabaseConfig, ObjectDatabase};
use odb_types::{hash_object, AbbreviatedObjectId, ObjectId, ObjectKind};
use serde_json::json;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match &cli.command {
        Command::HashObject(args) => cmd_hash_object(&cli, config, args),
        Command::CatFile(args) => cmd_cat_file(&cli, config, args),
        Command::ListPacks(_) => cmd_list_packs(&cli, config),
        Command::VerifyPack(args) => cmd_verify_pack(&cli, config, args),
        Command::Repack(_) => cmd_repack(&cli, config),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<DatabaseConfig> {
    match &cli.config {
        Some(path) => DatabaseConfig::load(path)
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(DatabaseConfig::default()),
    }
}

fn open_db(cli: &Cli, config: DatabaseConfig) -> anyhow::Result<ObjectDatabase> {
    if !cli.objects_dir.is_dir() {
        bail!("not an objects directory: {}", cli.objects_dir.display());
    }
    let db = ObjectDatabase::load(&cli.objects_dir, config)
        .with_context(|| format!("opening {}", cli.objects_dir.display()))?;
    debug!(dir = %cli.objects_dir.display(), packs = db.list_packs().len(), "opened database");
    Ok(db)
}

fn is_json(cli: &Cli) -> bool {
    matches!(cli.format, OutputFormat::Json)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_hash_object(cli: &Cli, config: DatabaseConfig, args: &HashObjectArgs) -> anyhow::Result<()> {
    let data = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let id = if args.write {
        let db = open_db(cli, config)?;
        let mut inserter = db.new_inserter();
        let id = inserter.insert(args.kind, data);
        inserter.flush()?;
        id
    } else {
        hash_object(config.hash, args.kind, &data)
    };

    if is_json(cli) {
        return print_json(&json!({ "id": id, "type": args.kind, "written": args.write }));
    }
    println!("{id}");
    Ok(())
}

fn cmd_cat_file(cli: &Cli, config: DatabaseConfig, args: &CatFileArgs) -> anyhow::Result<()> {
    let db = open_db(cli, config)?;
    let id = resolve_name(&db, &args.object)?;
    let loader = db.open(&id, None)?;

    if args.mode.kind {
        if is_json(cli) {
            return print_json(&json!({ "id": id, "type": loader.kind() }));
        }
        println!("{}", loader.kind());
        return Ok(());
    }
    if args.mode.size {
        if is_json(cli) {
            return print_json(&json!({ "id": id, "size": loader.size() }));
        }
        println!("{}", loader.size());
        return Ok(());
    }

    if is_json(cli) {
        let data = loader.bytes()?;
        return print_json(&json!({
            "id": id,
            "type": loader.kind(),
            "size": loader.size(),
            "source": loader.source(),
            "content": String::from_utf8_lossy(&data),
        }));
    }
    let mut stdout = io::stdout().lock();
    if loader.kind() == ObjectKind::Tree {
        for line in format_tree(&loader.bytes()?, db.algorithm().raw_len())? {
            writeln!(stdout, "{line}")?;
        }
    } else {
        io::copy(&mut loader.open_stream()?, &mut stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Turn a full or abbreviated hex name into the single id it denotes.
fn resolve_name(db: &ObjectDatabase, name: &str) -> anyhow::Result<ObjectId> {
    if name.len() == db.algorithm().hex_len() {
        return Ok(ObjectId::from_hex(name)?);
    }
    let prefix: AbbreviatedObjectId = name
        .parse()
        .map_err(|e| anyhow!("not a valid object name {name}: {e}"))?;
    let matches = db.resolve(&prefix)?;
    match matches.as_slice() {
        [] => bail!("not a valid object name {name}"),
        [id] => Ok(*id),
        many => {
            let candidates: Vec<String> = many.iter().take(10).map(|id| id.short_hex()).collect();
            bail!("short object id {name} is ambiguous: {}", candidates.join(", "))
        }
    }
}

/// Render tree entries as `<mode> <type> <id>\t<name>`.
fn format_tree(data: &[u8], id_len: usize) -> anyhow::Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| anyhow!("malformed tree entry: no mode"))?;
        let mode = std::str::from_utf8(&rest[..space])?;
        let nul = rest[space..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| space + p)
            .ok_or_else(|| anyhow!("malformed tree entry: no name terminator"))?;
        let name = String::from_utf8_lossy(&rest[space + 1..nul]);
        let id_end = nul + 1 + id_len;
        if rest.len() < id_end {
            bail!("malformed tree entry: truncated id");
        }
        let id = ObjectId::from_raw(&rest[nul + 1..id_end])?;
        let kind = match mode {
            "40000" => "tree",
            "160000" => "commit",
            _ => "blob",
        };
        lines.push(format!("{mode:0>6} {kind} {id}\t{name}"));
        rest = &rest[id_end..];
    }
    Ok(lines)
}

fn cmd_list_packs(cli: &Cli, config: DatabaseConfig) -> anyhow::Result<()> {
    let db = open_db(cli, config)?;
    let packs = db.list_packs();

    if is_json(cli) {
        let entries: Vec<_> = packs
            .iter()
            .map(|p| {
                json!({
                    "name": p.name(),
                    "objects": p.object_count(),
                    "bytes": p.identity().len(),
                    "version": p.version(),
                    "checksum": p.checksum(),
                })
            })
            .collect();
        return print_json(&json!({ "packs": entries, "cache": db.cache().stats() }));
    }

    if packs.is_empty() {
        println!("No packs.");
        return Ok(());
    }
    for pack in packs.iter() {
        println!(
            "{}  {} objects  {} bytes",
            pack.name().yellow(),
            pack.object_count().to_string().bold(),
            pack.identity().len()
        );
    }
    Ok(())
}

fn cmd_verify_pack(cli: &Cli, config: DatabaseConfig, args: &VerifyPackArgs) -> anyhow::Result<()> {
    let cache = Arc::new(BlockCache::new(config.cache.clone())?);
    let pack = PackFile::open(&args.pack, config.hash, cache)
        .with_context(|| format!("opening {}", args.pack.display()))?;
    let report = pack.verify(&DeltaResolver::new(config.max_delta_depth))?;

    if is_json(cli) {
        return print_json(&serde_json::to_value(&report)?);
    }
    println!("{} {}: ok", "✓".green().bold(), args.pack.display());
    println!("  Checksum: {}", report.checksum.to_string().cyan());
    println!(
        "  Objects: {} ({} whole, {} deltas)",
        report.objects.to_string().bold(),
        report.whole,
        report.deltas
    );
    println!(
        "  Commits: {}  Trees: {}  Blobs: {}  Tags: {}",
        report.commits, report.trees, report.blobs, report.tags
    );
    Ok(())
}

fn cmd_repack(cli: &Cli, config: DatabaseConfig) -> anyhow::Result<()> {
    let db = open_db(cli, config)?;
    let report = db.repack()?;

    if is_json(cli) {
        return print_json(&serde_json::to_value(&report)?);
    }
    match &report.pack {
        None => println!("Nothing to repack."),
        Some(name) => {
            println!("{} Repacked into {}", "✓".green().bold(), name.yellow());
            println!(
                "  Objects: {} ({} deltas)",
                report.objects.to_string().bold(),
                report.deltas
            );
            println!(
                "  Removed: {} packs, {} loose objects",
                report.packs_removed, report.loose_pruned
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use odb_types::HashAlgorithm;

    fn tree_entry(mode: &str, name: &str, id: &ObjectId) -> Vec<u8> {
        let mut out = format!("{mode} {name}\0").into_bytes();
        out.extend_from_slice(id.as_bytes());
        out
    }

    #[test]
    fn tree_formatting() {
        let blob = hash_object(HashAlgorithm::Sha1, ObjectKind::Blob, b"file");
        let tree = hash_object(HashAlgorithm::Sha1, ObjectKind::Tree, b"");
        let mut data = tree_entry("100644", "README", &blob);
        data.extend(tree_entry("40000", "src", &tree));
        let lines = format_tree(&data, 20).unwrap();
        assert_eq!(
            lines,
            vec![
                format!("100644 blob {blob}\tREADME"),
                format!("040000 tree {tree}\tsrc"),
            ]
        );
    }

    #[test]
    fn truncated_tree_is_an_error() {
        let blob = hash_object(HashAlgorithm::Sha1, ObjectKind::Blob, b"file");
        let data = tree_entry("100644", "README", &blob);
        assert!(format_tree(&data[..data.len() - 1], 20).is_err());
    }

    #[test]
    fn resolve_name_handles_full_short_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let db = ObjectDatabase::init(dir.path(), DatabaseConfig::default()).unwrap();
        let id = db.loose().write(ObjectKind::Blob, b"named").unwrap();

        assert_eq!(resolve_name(&db, &id.to_hex()).unwrap(), id);
        assert_eq!(resolve_name(&db, &id.to_hex()[..7]).unwrap(), id);
        let hex = id.to_hex();
        let other = if hex.starts_with('0') { "1" } else { "0" };
        assert!(resolve_name(&db, &format!("{other}{}", &hex[1..7])).is_err());
        assert!(resolve_name(&db, "not-hex").is_err());
    }

    #[test]
    fn hash_object_and_repack_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        ObjectDatabase::init(&objects, DatabaseConfig::default()).unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, b"hello\n").unwrap();

        let objects_arg = objects.to_str().unwrap();
        let file_arg = file.to_str().unwrap();
        let cli = Cli::try_parse_from(["odb", "--objects-dir", objects_arg, "hash-object", "-w", file_arg])
            .unwrap();
        run_command(cli).unwrap();

        let db = ObjectDatabase::load(&objects, DatabaseConfig::default()).unwrap();
        let id = ObjectId::from_hex("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        assert!(db.loose().has(&id));

        let cli = Cli::try_parse_from(["odb", "--objects-dir", objects_arg, "--format", "json", "repack"])
            .unwrap();
        run_command(cli).unwrap();
        db.rescan_packs().unwrap();
        assert_eq!(db.list_packs().len(), 1);
        assert!(!db.loose().has(&id));
    }

    #[test]
    fn missing_objects_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let cli = Cli::try_parse_from(["odb", "--objects-dir", missing.to_str().unwrap(), "list-packs"])
            .unwrap();
        let err = run_command(cli).unwrap_err();
        assert!(err.to_string().contains("not an objects directory"));
    }
}
