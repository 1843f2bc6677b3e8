use rand::RngCore;

/// Generates a random hex-encoded token from `len` bytes of entropy.
pub fn generate(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
