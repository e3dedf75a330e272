use std::fs::File;
use std::io::{BufReader, Cursor};

use cp_save::{load, save};

use crate::args::VerifyArgs;
use crate::error::CliError;

pub fn run(args: &VerifyArgs) -> Result<(), CliError> {
    let reader = BufReader::new(File::open(&args.save)?);
    let save_file = load(reader, |_| {})?;

    let mut buf = Vec::new();
    save(&save_file, Cursor::new(&mut buf))?;

    let reloaded = load(Cursor::new(&buf), |_| {})?;

    if reloaded.tree != save_file.tree {
        return Err(CliError::RoundTripMismatch);
    }

    println!("ok: tree round-trips ({} bytes re-saved)", buf.len());
    Ok(())
}
