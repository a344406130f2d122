//! Rock/paper/scissors against the assistant.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    fn beats(self, other: Choice) -> bool {
        matches!(
            (self, other),
            (Choice::Rock, Choice::Scissors)
                | (Choice::Paper, Choice::Rock)
                | (Choice::Scissors, Choice::Paper)
        )
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Choice::Rock => "Rock",
            Choice::Paper => "Paper",
            Choice::Scissors => "Scissors",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown choice '{0}', expected rock, paper or scissors")]
pub struct UnknownChoice(pub String);

impl FromStr for Choice {
    type Err = UnknownChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rock" => Ok(Choice::Rock),
            "paper" => Ok(Choice::Paper),
            "scissors" => Ok(Choice::Scissors),
            other => Err(UnknownChoice(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Tie,
    PlayerWins,
    AiWins,
}

impl Outcome {
    pub fn announcement(&self) -> &'static str {
        match self {
            Outcome::Tie => "It's a tie!",
            Outcome::PlayerWins => "You win!",
            Outcome::AiWins => "I win!",
        }
    }
}

pub fn judge(player: Choice, ai: Choice) -> Outcome {
    if player == ai {
        Outcome::Tie
    } else if player.beats(ai) {
        Outcome::PlayerWins
    } else {
        Outcome::AiWins
    }
}

/// One round: the assistant picks at random.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Round {
    pub player: Choice,
    pub ai: Choice,
    pub outcome: Outcome,
}

pub fn play<R: Rng + ?Sized>(player: Choice, rng: &mut R) -> Round {
    let ai = Choice::random(rng);
    Round {
        player,
        ai,
        outcome: judge(player, ai),
    }
}
