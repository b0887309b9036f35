use anyhow::{format_err, Result};
use rand::{distributions::Alphanumeric, prelude::*};
use std::{io::ErrorKind, path::PathBuf};
use tokio::fs::File;

/// Creates a uniquely-named file in the system tempdir, retrying on name collisions.
/// Used by [`crate::store::PersistentStore`] to write a new file before atomically
/// renaming it over the real store path.
pub async fn tempfile() -> Result<(PathBuf, File)> {
    const TEMP_PREFIX: &str = "tmpfile_";
    const RAND_LEN: usize = 10;
    const RETRIES: usize = 4;

    for _ in 0..RETRIES {
        let mut tempname = String::with_capacity(TEMP_PREFIX.len() + RAND_LEN);
        tempname.push_str(TEMP_PREFIX);
        tempname.extend(
            thread_rng()
                .sample_iter(Alphanumeric)
                .take(RAND_LEN)
                .map(char::from),
        );

        let mut path = std::env::temp_dir();
        path.push(tempname);
        match File::create(&path).await {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            file => return Ok((path, file?)),
        };
    }
    Err(format_err!("Failed to create tempfile"))
}
