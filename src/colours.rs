use image::Rgb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One colour per class, drawn once from the run seed so repeated runs paint alike.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colours: Vec<Rgb<u8>>,
}

impl Palette {
    pub fn seeded(seed: u64, num_classes: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let colours = (0..num_classes.max(1))
            .map(|_| Rgb([rng.gen_range(0..=255), rng.gen_range(0..=255), rng.gen_range(0..=255)]))
            .collect();
        Self { colours }
    }

    pub fn get_class_colour(&self, class: usize) -> Rgb<u8> {
        self.colours[class % self.colours.len()]
    }

    pub fn len(&self) -> usize {
        self.colours.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_colours() {
        let a = Palette::seeded(42, 5);
        let b = Palette::seeded(42, 5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert_eq!(a.get_class_colour(6), a.get_class_colour(1));
    }

    #[test]
    fn empty_class_list_still_has_a_colour() {
        let p = Palette::seeded(0, 0);
        let _ = p.get_class_colour(3);
    }
}
