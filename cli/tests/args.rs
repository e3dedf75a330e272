use clap::Parser;

use cp_cli::args::{Args, Command};

#[test]
fn list_parses_multiple_archives_and_recursive_flag() {
    let args = Args::parse_from([
        "cp",
        "list",
        "--archive",
        "base.archive",
        "--archive",
        "patch.archive",
        "--ardb",
        "base.ardb",
        "--recursive",
        "gameplay",
    ]);

    match args.command {
        Command::List(list) => {
            assert_eq!(list.mount.archives.len(), 2);
            assert_eq!(list.mount.ardbs.len(), 1);
            assert!(list.recursive);
            assert_eq!(list.path, "gameplay");
        }
        _ => panic!("expected a List command"),
    }
}

#[test]
fn list_defaults_to_mount_root() {
    let args = Args::parse_from(["cp", "list", "--archive", "base.archive"]);

    match args.command {
        Command::List(list) => assert_eq!(list.path, ""),
        _ => panic!("expected a List command"),
    }
}

#[test]
fn extract_requires_entry_and_out() {
    let args = Args::parse_from([
        "cp",
        "extract",
        "--archive",
        "base.archive",
        "gameplay\\save.xml",
        "out.xml",
    ]);

    match args.command {
        Command::Extract(extract) => {
            assert_eq!(extract.entry, "gameplay\\save.xml");
            assert_eq!(extract.out.to_str().unwrap(), "out.xml");
        }
        _ => panic!("expected an Extract command"),
    }
}

#[test]
fn inspect_and_verify_take_a_bare_path() {
    let args = Args::parse_from(["cp", "inspect", "quicksave.sav"]);
    match args.command {
        Command::Inspect(inspect) => assert_eq!(inspect.save.to_str().unwrap(), "quicksave.sav"),
        _ => panic!("expected an Inspect command"),
    }

    let args = Args::parse_from(["cp", "verify", "quicksave.sav"]);
    match args.command {
        Command::Verify(verify) => assert_eq!(verify.save.to_str().unwrap(), "quicksave.sav"),
        _ => panic!("expected a Verify command"),
    }
}

#[test]
fn at_least_one_archive_is_required() {
    let result = Args::try_parse_from(["cp", "list"]);
    assert!(result.is_err());
}

#[test]
fn ardb_search_roots_accumulate() {
    let args = Args::parse_from([
        "cp",
        "list",
        "--archive",
        "base.archive",
        "--ardb-search-root",
        "ardbs",
        "--ardb-search-root",
        "dlc/ardbs",
    ]);

    match args.command {
        Command::List(list) => assert_eq!(list.mount.ardb_search_roots.len(), 2),
        _ => panic!("expected a List command"),
    }
}
