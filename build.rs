//! Generates man pages for `hcsi` and each of its subcommands into
//! `OUT_DIR`.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn write_page(command: Command, out_dir: &Path, page: &str) -> io::Result<()> {
    let mut buffer = Vec::new();
    Man::new(command).title(page).render(&mut buffer)?;
    fs::write(out_dir.join(format!("{page}.1")), buffer)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(
        env::var_os("OUT_DIR")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?,
    );

    let root = cli::Cli::command();
    for subcommand in root.get_subcommands() {
        let page = format!("hcsi-{}", subcommand.get_name());
        write_page(subcommand.clone(), &out_dir, &page)?;
    }
    write_page(root, &out_dir, "hcsi")?;

    Ok(())
}
