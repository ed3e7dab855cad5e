/*!
 * ObjectId: 12 bytes, big-endian `seconds(4) | machine_id(3) | process_id(2) | counter(3)`.
 */

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

struct Generator {
    machine_id: [u8; 3],
    process_id: [u8; 2],
    counter: AtomicU32,
}

/// Process-wide singleton: machine id, process id, and a per-second counter,
/// initialized once at first use and never observable between processes.
fn generator() -> &'static Generator {
    static GEN: OnceLock<Generator> = OnceLock::new();
    GEN.get_or_init(|| {
        let pid = std::process::id() as u16;
        // Derive a pseudo machine id from the hostname (or pid as fallback)
        // the same way most drivers stub this in absence of a real NIC MAC.
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let digest = hostname.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let machine_id = digest.to_be_bytes();
        Generator {
            machine_id: [machine_id[0], machine_id[1], machine_id[2]],
            process_id: pid.to_be_bytes(),
            counter: AtomicU32::new(digest ^ (pid as u32)),
        }
    })
}

impl ObjectId {
    pub fn new() -> Self {
        let gen = generator();
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        let counter = gen.counter.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        let counter_bytes = counter.to_be_bytes();

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..7].copy_from_slice(&gen.machine_id);
        bytes[7..9].copy_from_slice(&gen.process_id);
        bytes[9..12].copy_from_slice(&counter_bytes[1..4]);
        ObjectId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(24);
        for b in self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    pub fn parse_hex(hex: &str) -> Result<Self> {
        if hex.len() != 24 {
            return Err(Error::new(ErrorKind::InvalidArgument(format!(
                "ObjectId hex string must be 24 characters, got {}",
                hex.len()
            ))));
        }
        let mut bytes = [0u8; 12];
        for i in 0..12 {
            let byte_str = &hex[i * 2..i * 2 + 2];
            bytes[i] = u8::from_str_radix(byte_str, 16)
                .map_err(|_| Error::new(ErrorKind::InvalidArgument(format!("invalid hex in ObjectId: {}", hex))))?;
        }
        Ok(ObjectId(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
