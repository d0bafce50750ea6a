//! Proof-of-humanity challenges.
//!
//! A challenge is a small arithmetic question bound to a random token. The
//! answer lives in its own short-lived store under `CAPTCHA_<token>` and is
//! consumed on the first correct answer. Rendering the question as an image
//! is left to the client.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::store::KvStore;

/// Default lifetime of an issued challenge.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(600);

const KEY_PREFIX: &str = "CAPTCHA_";

/// An issued challenge as handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub token: String,
    /// Human-readable question, e.g. `7 × 3 = ?`.
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Add,
    Sub,
    Mul,
}

impl Operator {
    fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '×',
        }
    }
}

/// Issues and verifies single-use challenges against a [`KvStore`].
pub struct ChallengeStore<S> {
    store: S,
    ttl: Duration,
}

impl<S: KvStore> ChallengeStore<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Issue a fresh challenge and remember its answer.
    pub fn issue(&self) -> Challenge {
        let mut rng = rand::thread_rng();
        let op = match rng.gen_range(0..3) {
            0 => Operator::Add,
            1 => Operator::Sub,
            _ => Operator::Mul,
        };
        let (prompt, answer) = compose(rng.gen_range(1..=9), rng.gen_range(1..=9), op);

        let token = uuid::Uuid::new_v4().to_string();
        self.store
            .put(&key(&token), answer.to_string(), self.ttl);
        tracing::debug!(token = %token, ttl_secs = self.ttl.as_secs(), "challenge issued");

        Challenge { token, prompt }
    }

    /// Check `answer` for `token`. A correct answer consumes the token; a
    /// wrong one leaves it in place until it expires.
    pub fn verify(&self, token: &str, answer: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        let key = key(token);
        match self.store.get(&key) {
            Some(expected) if expected == answer.trim() => {
                self.store.remove(&key);
                true
            }
            _ => false,
        }
    }
}

fn key(token: &str) -> String {
    format!("{KEY_PREFIX}{token}")
}

/// Build the prompt and answer. Subtraction puts the larger operand first.
fn compose(a: u32, b: u32, op: Operator) -> (String, u32) {
    let (a, b) = match op {
        Operator::Sub if a < b => (b, a),
        _ => (a, b),
    };
    let answer = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
    };
    (format!("{a} {} {b} = ?", op.symbol()), answer)
}
