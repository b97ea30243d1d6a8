//! Random `adjective-animal-color` project names.

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "agile", "brave", "calm", "clever", "curious", "daring", "eager", "fancy", "gentle", "happy",
    "jolly", "keen", "lively", "lucky", "mighty", "nimble", "proud", "quiet", "rapid", "silly",
    "sleepy", "swift", "tidy", "witty", "zesty",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "cobra", "crane", "dolphin", "eagle", "falcon", "ferret", "gecko",
    "heron", "jaguar", "koala", "lemur", "lynx", "marten", "otter", "panda", "puffin", "raven",
    "salmon", "tiger", "walrus", "wombat", "zebra",
];

const COLORS: &[&str] = &[
    "amber", "aqua", "azure", "beige", "black", "blue", "bronze", "coral", "crimson", "cyan",
    "gold", "gray", "green", "indigo", "ivory", "lavender", "lime", "magenta", "maroon", "olive",
    "orange", "pink", "purple", "silver", "teal",
];

pub fn project_name() -> String {
    project_name_with(&mut rand::thread_rng())
}

pub fn project_name_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let pick = |words: &[&'static str], rng: &mut R| *words.choose(rng).unwrap_or(&words[0]);
    let adjective = pick(ADJECTIVES, rng);
    let animal = pick(ANIMALS, rng);
    let color = pick(COLORS, rng);
    format!("{adjective}-{animal}-{color}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn three_dash_separated_words() {
        let name = project_name();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(ANIMALS.contains(&parts[1]));
        assert!(COLORS.contains(&parts[2]));
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let a = project_name_with(&mut StdRng::seed_from_u64(7));
        let b = project_name_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
