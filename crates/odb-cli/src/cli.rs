use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use odb_types::ObjectKind;

#[derive(Parser)]
#[command(
    name = "odb",
    about = "Inspect and maintain a git-compatible object database",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// The objects directory to operate on.
    #[arg(long, global = true, default_value = ".git/objects")]
    pub objects_dir: PathBuf,

    /// TOML file with database settings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compute an object id, optionally storing the object
    HashObject(HashObjectArgs),
    /// Show an object's type, size, or content
    CatFile(CatFileArgs),
    /// List the packs in the database
    ListPacks(ListPacksArgs),
    /// Check a pack's checksum, CRCs, and object ids
    VerifyPack(VerifyPackArgs),
    /// Rewrite every object into a single pack
    Repack(RepackArgs),
}

#[derive(Args)]
pub struct HashObjectArgs {
    pub file: PathBuf,
    /// Write the object into the database
    #[arg(short = 'w')]
    pub write: bool,
    #[arg(short = 't', long = "type", default_value = "blob")]
    pub kind: ObjectKind,
}

#[derive(Args)]
pub struct CatFileArgs {
    #[command(flatten)]
    pub mode: CatFileMode,
    /// Full or abbreviated object id
    pub object: String,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct CatFileMode {
    /// Show the object's type
    #[arg(short = 't')]
    pub kind: bool,
    /// Show the object's size
    #[arg(short = 's')]
    pub size: bool,
    /// Show the object's content
    #[arg(short = 'p')]
    pub pretty: bool,
}

#[derive(Args)]
pub struct ListPacksArgs {}

#[derive(Args)]
pub struct VerifyPackArgs {
    /// Path to a `.pack` file; its `.idx` must sit beside it
    pub pack: PathBuf,
}

#[derive(Args)]
pub struct RepackArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hash_object() {
        let cli = Cli::try_parse_from(["odb", "hash-object", "-w", "-t", "tree", "f.txt"]).unwrap();
        if let Command::HashObject(args) = cli.command {
            assert!(args.write);
            assert_eq!(args.kind, ObjectKind::Tree);
            assert_eq!(args.file, PathBuf::from("f.txt"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn hash_object_defaults_to_blob() {
        let cli = Cli::try_parse_from(["odb", "hash-object", "f.txt"]).unwrap();
        if let Command::HashObject(args) = cli.command {
            assert!(!args.write);
            assert_eq!(args.kind, ObjectKind::Blob);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Cli::try_parse_from(["odb", "hash-object", "-t", "frob", "f"]).is_err());
    }

    #[test]
    fn parse_cat_file() {
        let cli = Cli::try_parse_from(["odb", "cat-file", "-p", "abc123"]).unwrap();
        if let Command::CatFile(args) = cli.command {
            assert!(args.mode.pretty);
            assert!(!args.mode.kind);
            assert_eq!(args.object, "abc123");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn cat_file_needs_exactly_one_mode() {
        assert!(Cli::try_parse_from(["odb", "cat-file", "abc"]).is_err());
        assert!(Cli::try_parse_from(["odb", "cat-file", "-t", "-s", "abc"]).is_err());
    }

    #[test]
    fn parse_list_packs() {
        let cli = Cli::try_parse_from(["odb", "list-packs"]).unwrap();
        assert!(matches!(cli.command, Command::ListPacks(_)));
        assert_eq!(cli.objects_dir, PathBuf::from(".git/objects"));
    }

    #[test]
    fn parse_verify_pack() {
        let cli = Cli::try_parse_from(["odb", "verify-pack", "p.pack"]).unwrap();
        if let Command::VerifyPack(args) = cli.command {
            assert_eq!(args.pack, PathBuf::from("p.pack"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_options() {
        let cli = Cli::try_parse_from([
            "odb", "repack", "--objects-dir", "/srv/repo.git/objects", "--config", "odb.toml", "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Repack(_)));
        assert!(cli.verbose);
        assert_eq!(cli.objects_dir, PathBuf::from("/srv/repo.git/objects"));
        assert_eq!(cli.config, Some(PathBuf::from("odb.toml")));
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["odb", "--format", "json", "list-packs"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
