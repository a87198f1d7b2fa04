//! Prints an argon2 hash for seeding a row in `usuarios`.

use std::env;

use anyhow::{bail, Result};
use expedientes::auth::password::hash_password;

fn main() -> Result<()> {
    let Some(password) = env::args().nth(1) else {
        bail!("usage: hash_password <password>");
    };
    println!("{}", hash_password(&password)?);
    Ok(())
}
