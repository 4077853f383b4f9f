//! Content-derived identifier for a resolved invocation

use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::Path;

const ID_BYTES: usize = 16;

/// Hash the exact invocation into a 32 character lowercase hex id.
///
/// Every field is length-prefixed and every sequence carries its element
/// count, so no two distinct invocations share an encoding.
pub fn identify(
    work_dir: &Path,
    command: &str,
    args: &[String],
    env: &[(OsString, OsString)],
) -> String {
    let mut hasher = Sha256::new();

    write_field(&mut hasher, work_dir.as_os_str().as_encoded_bytes());
    write_field(&mut hasher, command.as_bytes());

    write_count(&mut hasher, args.len());
    for arg in args {
        write_field(&mut hasher, arg.as_bytes());
    }

    write_count(&mut hasher, env.len());
    for (key, value) in env {
        let mut entry = Vec::with_capacity(key.len() + value.len() + 1);
        entry.extend_from_slice(key.as_encoded_bytes());
        entry.push(b'=');
        entry.extend_from_slice(value.as_encoded_bytes());
        write_field(&mut hasher, &entry);
    }

    let digest = hasher.finalize();
    hex::encode(&digest[..ID_BYTES])
}

fn write_count(hasher: &mut Sha256, count: usize) {
    hasher.update((count as u64).to_be_bytes());
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    write_count(hasher, bytes.len());
    hasher.update(bytes);
}
