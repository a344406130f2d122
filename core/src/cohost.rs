//! Co-host "radio" mode: a rotating topic the assistant opens with.

use rand::seq::SliceRandom;
use rand::Rng;

pub const TOPICS: &[&str] = &[
    "The nature of consciousness",
    "What does it mean to be 'real'?",
    "The future of human-AI relationships",
    "Reviewing the latest tech news",
    "Analyzing a piece of art",
    "Just hanging out and chatting",
    "Deep dive into emotions",
    "Creative writing prompt",
];

/// Prompt submitted on the user's behalf when the topic changes.
pub fn topic_prompt(topic: &str) -> String {
    format!(
        "Let's talk about this topic: \"{topic}\". Start the conversation with an interesting thought or question."
    )
}

#[derive(Debug, Clone)]
pub struct CoHost {
    current: &'static str,
}

impl Default for CoHost {
    fn default() -> Self {
        Self { current: TOPICS[0] }
    }
}

impl CoHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_topic(&self) -> &'static str {
        self.current
    }

    /// Pick a random topic (repeats allowed) and make it current.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &'static str {
        if let Some(topic) = TOPICS.choose(rng) {
            self.current = *topic;
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn prompt_quotes_the_topic() {
        assert_eq!(
            topic_prompt("Deep dive into emotions"),
            "Let's talk about this topic: \"Deep dive into emotions\". Start the conversation with an interesting thought or question."
        );
    }

    #[test]
    fn shuffle_picks_a_known_topic() {
        let mut cohost = CoHost::new();
        assert_eq!(cohost.current_topic(), "The nature of consciousness");
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let topic = cohost.shuffle(&mut rng);
            assert!(TOPICS.contains(&topic));
            assert_eq!(cohost.current_topic(), topic);
        }
    }
}
