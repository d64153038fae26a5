use super::{DeliveryQueue, RandomValue, RandomnessDelivery, RandomnessError, RandomnessProvider};
use crate::common::types::{LotteryId, RequestId};
use schnorrkel::{context::SigningContext, Keypair, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

const VRF_SIGNING_CONTEXT: &[u8] = b"meltyfi";

/// Public evidence for a drawn value, all fields hex-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfProof {
    pub output: String,
    pub proof: String,
    pub public_key: String,
    pub input_message: String,
}

impl VrfProof {
    /// The random value this proof commits to
    pub fn value(&self) -> Result<RandomValue, RandomnessError> {
        RandomValue::try_from(self.output.clone()).map_err(RandomnessError::InvalidProof)
    }
}

/// Message signed for a lottery draw request
pub fn draw_input(lottery_id: LotteryId, request_id: RequestId) -> String {
    format!("meltyfi:lottery:{}:{}", lottery_id, request_id)
}

/// Signature-derived randomness that anyone holding the public key can verify
pub struct VrfRandomnessProvider {
    keypair: Arc<Keypair>,
    queue: DeliveryQueue,
}

impl VrfRandomnessProvider {
    pub fn new(keypair: Keypair, queue_capacity: usize) -> Self {
        Self {
            keypair: Arc::new(keypair),
            queue: DeliveryQueue::new(queue_capacity),
        }
    }

    /// Provider with a fresh keypair from the OS RNG
    pub fn new_random(queue_capacity: usize) -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng), queue_capacity)
    }

    /// Rebuild a provider from a hex-encoded 64-byte secret key
    pub fn from_secret_hex(secret: &str, queue_capacity: usize) -> Result<Self, RandomnessError> {
        let bytes = hex::decode(secret).map_err(|e| RandomnessError::Unavailable(format!("invalid key hex: {}", e)))?;
        let secret = schnorrkel::SecretKey::from_bytes(&bytes)
            .map_err(|e| RandomnessError::Unavailable(format!("invalid secret key: {:?}", e)))?;
        Ok(Self::new(secret.to_keypair(), queue_capacity))
    }

    pub fn prove(&self, input_message: &str) -> VrfProof {
        let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
        let signature = self.keypair.sign(ctx.bytes(input_message.as_bytes()));
        let signature_bytes = signature.to_bytes();

        // output is the hash of the signature
        let output = Sha256::digest(signature_bytes);

        VrfProof {
            output: hex::encode(output),
            proof: hex::encode(signature_bytes),
            public_key: self.public_key_hex(),
            input_message: input_message.to_string(),
        }
    }

    /// Check the signature and that the output derives from it
    pub fn verify(proof: &VrfProof, expected_input: &str) -> Result<bool, RandomnessError> {
        if proof.input_message != expected_input {
            return Ok(false);
        }

        let output = hex::decode(&proof.output)
            .map_err(|e| RandomnessError::InvalidProof(format!("output hex: {}", e)))?;
        let signature_bytes: [u8; 64] = hex::decode(&proof.proof)
            .map_err(|e| RandomnessError::InvalidProof(format!("proof hex: {}", e)))?
            .try_into()
            .map_err(|_| RandomnessError::InvalidProof("signature must be 64 bytes".into()))?;
        let public_key_bytes: [u8; 32] = hex::decode(&proof.public_key)
            .map_err(|e| RandomnessError::InvalidProof(format!("public key hex: {}", e)))?
            .try_into()
            .map_err(|_| RandomnessError::InvalidProof("public key must be 32 bytes".into()))?;

        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| RandomnessError::InvalidProof(format!("public key: {:?}", e)))?;
        let signature = Signature::from_bytes(&signature_bytes)
            .map_err(|e| RandomnessError::InvalidProof(format!("signature: {:?}", e)))?;

        let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
        if public_key.verify(ctx.bytes(expected_input.as_bytes()), &signature).is_err() {
            return Ok(false);
        }

        Ok(Sha256::digest(signature_bytes).as_slice() == output.as_slice())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }
}

impl RandomnessProvider for VrfRandomnessProvider {
    fn request_randomness(&self, lottery_id: LotteryId) -> Result<RequestId, RandomnessError> {
        let request_id = RequestId::new();
        let proof = self.prove(&draw_input(lottery_id, request_id));
        let value = proof.value()?;

        self.queue.push(RandomnessDelivery {
            request_id,
            lottery_id,
            value,
            proof: Some(proof),
        })?;

        debug!(lottery_id, %request_id, "VRF randomness requested");
        Ok(request_id)
    }

    fn poll_ready(&self) -> Vec<RandomnessDelivery> {
        self.queue.drain()
    }

    fn is_cryptographically_secure(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "vrf"
    }
}
