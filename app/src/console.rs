use std::io::Write;

use her_os_core::errors::SpeechError;
use her_os_core::persona::PersonaId;
use her_os_core::speech::{session, Session, SpeechSynthesis};

/// Synthesis for a terminal: the reply is printed as `[persona] text` and the
/// session resolves at once.
pub struct ConsoleVoice;

impl SpeechSynthesis for ConsoleVoice {
    fn speak(&self, text: &str, persona: &PersonaId) -> Session<()> {
        let (session, control) = session();
        let mut stdout = std::io::stdout().lock();
        let outcome = writeln!(stdout, "[{persona}] {text}")
            .and_then(|_| stdout.flush())
            .map_err(|err| SpeechError::SynthesisFailed(err.to_string()));
        control.finish(outcome);
        session
    }
}
