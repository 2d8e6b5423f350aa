use crate::config::ProviderParams;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Mutex;
use std::time::Instant;
use thiserror::Error;

/// Opaque encrypted encoding of a numeric vector.
///
/// The pipeline only ever moves these around; the algebra lives in
/// [`HomomorphicProvider`]. There is deliberately no equality, comparison
/// or generic multiply on this type. For transport the blob is hex-encoded
/// so the newline frame terminator can never appear inside a payload.
#[derive(Debug, Clone)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }
}

impl Serialize for Ciphertext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Ciphertext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ciphertext::from_hex(&s).map_err(D::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("ciphertext was produced under a different encryption context")]
    ContextMismatch,
    #[error("noise budget exhausted after {0} homomorphic operations")]
    NoiseBudgetExhausted(u32),
    #[error("malformed ciphertext payload: {0}")]
    Codec(#[from] bincode::Error),
    #[error("cannot encrypt an empty value vector")]
    EmptyPlaintext,
}

/// The encrypted-arithmetic capability consumed by meters and the
/// aggregator. Implementations define an approximate scheme: `add` is
/// commutative and associative on the numeric result, but every operation
/// consumes headroom from a finite noise budget, so callers must not
/// assume unlimited chain length and must propagate
/// [`ProviderError::NoiseBudgetExhausted`].
pub trait HomomorphicProvider: Send + Sync {
    /// Encrypts a vector of readings into one ciphertext. Returns the
    /// ciphertext and the elapsed encryption time in milliseconds.
    fn encrypt(&self, values: &[f64]) -> Result<(Ciphertext, f64), ProviderError>;

    /// Homomorphic addition of two ciphertexts from the same context.
    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, ProviderError>;

    /// Multiplies a ciphertext by a plaintext scalar.
    fn multiply_plain(&self, a: &Ciphertext, scalar: f64) -> Result<Ciphertext, ProviderError>;

    /// Decrypts a ciphertext back to its value vector. Used only by
    /// verification tooling and tests, never by the pipeline itself.
    fn decrypt(&self, a: &Ciphertext) -> Result<Vec<f64>, ProviderError>;

    /// Serialized encryption context, for distributing shared keys to all
    /// meters in a grid.
    fn serialize_context(&self) -> Vec<u8>;

    fn params(&self) -> ProviderParams;
}

/// Operation-depth ceiling for [`SimCkksProvider`]. Stands in for the
/// noise headroom a real leveled scheme would track.
pub const SIM_NOISE_BUDGET: u32 = 4096;

const MULT_DEPTH_COST: u32 = 8;

/// Relative magnitude of the approximation noise injected at encryption.
const NOISE_SCALE: f64 = 1e-9;

#[derive(Serialize, Deserialize)]
struct SimPayload {
    context_key: [u8; 16],
    depth: u32,
    slots: Vec<f64>,
}

/// A process-local stand-in for a CKKS backend.
///
/// NOT a cryptosystem and not secure: slot values are bincode-encoded in
/// the clear. What it does model faithfully is the algebra the pipeline
/// is allowed to rely on: add / multiply-by-plain-scalar / decrypt only,
/// approximation noise at encryption, context compatibility checks, and a
/// finite operation-depth budget. Swap in a real CKKS library behind
/// [`HomomorphicProvider`] for actual confidentiality.
pub struct SimCkksProvider {
    params: ProviderParams,
    context_key: [u8; 16],
    rng: Mutex<StdRng>,
}

impl SimCkksProvider {
    pub fn new(params: ProviderParams) -> Self {
        let mut rng = StdRng::from_entropy();
        let mut context_key = [0u8; 16];
        rng.fill(&mut context_key[..]);
        Self {
            params,
            context_key,
            rng: Mutex::new(rng),
        }
    }

    /// Deterministic construction for tests.
    pub fn with_seed(params: ProviderParams, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut context_key = [0u8; 16];
        rng.fill(&mut context_key[..]);
        Self {
            params,
            context_key,
            rng: Mutex::new(rng),
        }
    }

    /// Rebuilds a provider sharing the context of another instance, as a
    /// meter would after receiving the serialized context from the grid.
    pub fn from_context(params: ProviderParams, context: &[u8]) -> Result<Self, ProviderError> {
        if context.len() != 16 {
            return Err(ProviderError::ContextMismatch);
        }
        let mut context_key = [0u8; 16];
        context_key.copy_from_slice(context);
        Ok(Self {
            params,
            context_key,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    fn decode(&self, ct: &Ciphertext) -> Result<SimPayload, ProviderError> {
        let payload: SimPayload = bincode::deserialize(ct.as_bytes())?;
        if payload.context_key != self.context_key {
            return Err(ProviderError::ContextMismatch);
        }
        Ok(payload)
    }

    fn encode(&self, payload: &SimPayload) -> Result<Ciphertext, ProviderError> {
        Ok(Ciphertext::from_bytes(bincode::serialize(payload)?))
    }

    fn check_budget(&self, depth: u32) -> Result<(), ProviderError> {
        if depth > SIM_NOISE_BUDGET {
            return Err(ProviderError::NoiseBudgetExhausted(depth));
        }
        Ok(())
    }
}

impl HomomorphicProvider for SimCkksProvider {
    fn encrypt(&self, values: &[f64]) -> Result<(Ciphertext, f64), ProviderError> {
        if values.is_empty() {
            return Err(ProviderError::EmptyPlaintext);
        }
        let start = Instant::now();
        let slots = {
            let mut rng = self.rng.lock().unwrap();
            values
                .iter()
                .map(|v| {
                    let noise = rng.gen_range(-1.0..1.0) * (v.abs() * NOISE_SCALE + NOISE_SCALE);
                    v + noise
                })
                .collect()
        };
        let ct = self.encode(&SimPayload {
            context_key: self.context_key,
            depth: 0,
            slots,
        })?;
        Ok((ct, start.elapsed().as_secs_f64() * 1000.0))
    }

    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, ProviderError> {
        let pa = self.decode(a)?;
        let pb = self.decode(b)?;
        let depth = pa.depth.max(pb.depth) + 1;
        self.check_budget(depth)?;

        // Slot-wise addition; the shorter vector behaves as if padded
        // with zero slots, matching vector addition in a real scheme.
        let (mut longer, shorter) = if pa.slots.len() >= pb.slots.len() {
            (pa.slots, pb.slots)
        } else {
            (pb.slots, pa.slots)
        };
        for (slot, v) in longer.iter_mut().zip(shorter.iter()) {
            *slot += v;
        }
        self.encode(&SimPayload {
            context_key: self.context_key,
            depth,
            slots: longer,
        })
    }

    fn multiply_plain(&self, a: &Ciphertext, scalar: f64) -> Result<Ciphertext, ProviderError> {
        let mut payload = self.decode(a)?;
        let depth = payload.depth + MULT_DEPTH_COST;
        self.check_budget(depth)?;
        for slot in payload.slots.iter_mut() {
            *slot *= scalar;
        }
        payload.depth = depth;
        self.encode(&payload)
    }

    fn decrypt(&self, a: &Ciphertext) -> Result<Vec<f64>, ProviderError> {
        Ok(self.decode(a)?.slots)
    }

    fn serialize_context(&self) -> Vec<u8> {
        self.context_key.to_vec()
    }

    fn params(&self) -> ProviderParams {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_has_no_newline() {
        let ct = Ciphertext::from_bytes(vec![0x0a, 0xff, 0x00, 0x0a]);
        let encoded = ct.to_hex();
        assert!(!encoded.contains('\n'));
        let back = Ciphertext::from_hex(&encoded).unwrap();
        assert_eq!(back.as_bytes(), ct.as_bytes());
    }

    #[test]
    fn add_consumes_depth() {
        let provider = SimCkksProvider::with_seed(ProviderParams::default(), 7);
        let (a, _) = provider.encrypt(&[1.0]).unwrap();
        let (b, _) = provider.encrypt(&[2.0]).unwrap();
        let sum = provider.add(&a, &b).unwrap();
        let payload: SimPayload = bincode::deserialize(sum.as_bytes()).unwrap();
        assert_eq!(payload.depth, 1);
    }
}
