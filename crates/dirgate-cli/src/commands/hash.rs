//! hash command - encode a password for the user store

use anyhow::{Context, Result};
use dirgate_crypto::{hash_password, HashScheme};
use std::io::BufRead;

pub fn execute(scheme: HashScheme) -> Result<()> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;

    let password = strip_line_ending(&line);
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let hash = hash_password(password, scheme).context("Unable to hash the password")?;
    println!("{}", hash);

    Ok(())
}

fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}
