// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn global_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("data_dir")
            .long("data-dir")
            .value_name("DIR")
            .global(true)
            .default_value("/var/lib/artpack")
            .help("User data directory; add-ons are installed into <DATA_DIR>/addons"),
    )
    .arg(
        Arg::new("system_dir")
            .long("system-dir")
            .value_name("DIR")
            .global(true)
            .help("Directory of add-ons bundled with the application (read-only)"),
    )
    .arg(
        Arg::new("db_path")
            .short('d')
            .long("db-path")
            .value_name("PATH")
            .global(true)
            .help("Database path (default: <DATA_DIR>/artpack.db)"),
    )
    .arg(
        Arg::new("app_version")
            .long("app-version")
            .value_name("VERSION")
            .global(true)
            .help("Running application version; remembered once given"),
    )
    .arg(
        Arg::new("catalog_url")
            .long("catalog-url")
            .value_name("URL")
            .global(true)
            .help("Add-on catalog URL"),
    )
    .arg(
        Arg::new("release_feed_url")
            .long("release-feed-url")
            .value_name("URL")
            .global(true)
            .help("Application release feed URL"),
    )
}

fn build_cli() -> Command {
    global_args(
        Command::new("artpack")
            .version(env!("CARGO_PKG_VERSION"))
            .author("Artpack Contributors")
            .about("Add-on package manager with verified downloads and atomic installs"),
    )
    .subcommand_required(false)
    .subcommand(Command::new("init").about("Initialize the Artpack database"))
    .subcommand(Command::new("list").about("List installed add-ons"))
    .subcommand(
        Command::new("install")
            .about("Install an add-on from a local archive")
            .arg(Arg::new("archive").required(true).help("Path to the add-on archive")),
    )
    .subcommand(
        Command::new("download")
            .about("Download and install an add-on from the catalog")
            .arg(Arg::new("key").required(true).help("Catalog key of the add-on"))
            .arg(Arg::new("version").help("Version to install (default: newest compatible)")),
    )
    .subcommand(
        Command::new("uninstall")
            .about("Remove an installed add-on")
            .arg(Arg::new("id").required(true).help("Add-on id")),
    )
    .subcommand(
        Command::new("catalog").about("Show catalog add-ons compatible with this application"),
    )
    .subcommand(Command::new("update-all").about("Update every outdated add-on"))
    .subcommand(
        Command::new("resync").about("Re-fetch the baseline add-on if it is missing or outdated"),
    )
    .subcommand(
        Command::new("missing")
            .about("Report required add-ons that are missing or too old")
            .arg(
                Arg::new("required")
                    .num_args(0..)
                    .help("Requirements as <id>=<version>"),
            ),
    )
    .subcommand(Command::new("history").about("Show changeset history"))
    .subcommand(
        Command::new("add-path")
            .about("Add an explicit add-on folder, scanned before all other roots")
            .arg(Arg::new("path").required(true)),
    )
    .subcommand(
        Command::new("remove-path")
            .about("Forget an explicit add-on folder")
            .arg(Arg::new("path").required(true)),
    )
    .subcommand(
        Command::new("channel")
            .about("Show or set the update channel (stable, beta, dev)")
            .arg(Arg::new("channel")),
    )
    .subcommand(
        Command::new("check-update")
            .about("Check the release feed for a newer application version"),
    )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("artpack.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
