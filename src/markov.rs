//! Order-2 word-level Markov chain for the `/markov` command.
//!
//! Grounded on the same `rand::seq::SliceRandom` dependency the transcoder's
//! RTP layer already pulls in for jitter (see `Cargo.toml`); here it drives
//! weighted sampling over the chain's successor lists instead.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

const SEED_CORPUS: &str = include_str!("../assets/markov_seed.txt");
const MAX_WORDS: usize = 60;

type Bigram = (String, String);

/// An order-2 transition table: a bigram key maps to every observed
/// successor word, in occurrence order so sampling is frequency-weighted.
pub struct MarkovChain {
    transitions: HashMap<Bigram, Vec<String>>,
    starts: Vec<Bigram>,
}

impl MarkovChain {
    pub fn from_corpus(text: &str) -> Self {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut transitions: HashMap<Bigram, Vec<String>> = HashMap::new();
        let mut starts = Vec::new();

        for window in words.windows(3) {
            let [a, b, c] = [window[0], window[1], window[2]] else { continue };
            let key = (a.to_string(), b.to_string());
            if !transitions.contains_key(&key) {
                starts.push(key.clone());
            }
            transitions.entry(key).or_default().push(c.to_string());
        }

        Self { transitions, starts }
    }

    pub fn seeded() -> Self {
        Self::from_corpus(SEED_CORPUS)
    }

    /// Generates up to [`MAX_WORDS`] words starting from a random bigram,
    /// stopping early if no successor is known for the current state.
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let Some((mut a, mut b)) = self.starts.choose(&mut rng).cloned() else {
            return String::new();
        };

        let mut output = vec![a.clone(), b.clone()];
        for _ in 0..MAX_WORDS {
            let Some(successors) = self.transitions.get(&(a.clone(), b.clone())) else { break };
            let Some(next) = successors.choose(&mut rng) else { break };
            output.push(next.clone());
            a = b;
            b = next.clone();
        }

        output.join(" ")
    }

    /// Generates text seeded from `prompt`'s last two words, falling back to
    /// a random start if the prompt's bigram was never observed.
    pub fn generate_from(&self, prompt: &str) -> String {
        let words: Vec<&str> = prompt.split_whitespace().collect();
        if words.len() < 2 {
            return self.generate();
        }
        let key = (words[words.len() - 2].to_string(), words[words.len() - 1].to_string());
        if !self.transitions.contains_key(&key) {
            return self.generate();
        }

        let mut rng = rand::thread_rng();
        let (mut a, mut b) = key;
        let mut output = vec![a.clone(), b.clone()];
        for _ in 0..MAX_WORDS {
            let Some(successors) = self.transitions.get(&(a.clone(), b.clone())) else { break };
            let idx = rng.gen_range(0..successors.len());
            let next = successors[idx].clone();
            output.push(next.clone());
            a = b;
            b = next;
        }
        output.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_transitions_from_a_small_corpus() {
        let chain = MarkovChain::from_corpus("the quick brown fox jumps over the quick brown dog");
        let key = ("the".to_string(), "quick".to_string());
        let successors = chain.transitions.get(&key).unwrap();
        assert_eq!(successors.len(), 2);
        assert!(successors.contains(&"brown".to_string()));
    }

    #[test]
    fn generate_never_exceeds_the_word_cap() {
        let chain = MarkovChain::from_corpus(&"loop loop loop ".repeat(50));
        let text = chain.generate();
        assert!(text.split_whitespace().count() <= MAX_WORDS + 2);
    }

    #[test]
    fn empty_corpus_generates_empty_text() {
        let chain = MarkovChain::from_corpus("");
        assert_eq!(chain.generate(), "");
    }
}
