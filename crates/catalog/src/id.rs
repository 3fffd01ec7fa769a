use rand::RngCore;

/// Generate `bytes` random bytes from the OS and hex-encode them.
///
/// ID byte widths are part of the external contract (they show up in URLs
/// and generated edge-router config): 8 bytes for users, repositories,
/// deployments, namespaces and volumes; 32 bytes for routers, certificates
/// and nodes.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Keep generating `bytes`-wide hex IDs until one is not claimed by
/// `taken`. Collisions are vanishingly rare in practice, so this loop all
/// but never repeats.
pub fn unique_hex<F>(bytes: usize, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    loop {
        let id = random_hex(bytes);
        if !taken(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_hex_has_requested_width() {
        assert_eq!(random_hex(8).len(), 16);
        assert_eq!(random_hex(32).len(), 64);
    }

    #[test]
    fn unique_hex_retries_past_collisions() {
        // Reject the first two candidates; the loop must keep going and
        // hand back a third that was never marked taken.
        let rejected = std::cell::RefCell::new(Vec::new());
        let id = unique_hex(8, |candidate| {
            let mut rejected = rejected.borrow_mut();
            if rejected.len() < 2 {
                rejected.push(candidate.to_string());
                return true;
            }
            false
        });
        assert_eq!(rejected.borrow().len(), 2);
        assert!(!rejected.borrow().contains(&id));
        assert_eq!(id.len(), 16);
    }
}
