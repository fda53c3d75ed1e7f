use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Order in which a strip expects the colour channels of each pixel.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
pub enum ChannelFormat {
    RGB,
    RBG,
    GRB,
    GBR,
    BRG,
    BGR,
}

impl Default for ChannelFormat {
    fn default() -> Self {
        ChannelFormat::GRB
    }
}

impl ChannelFormat {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn names() -> Vec<&'static str> {
        ChannelFormat::iter().map(ChannelFormat::name).collect()
    }

    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<ChannelFormat> {
        name.parse().ok()
    }

    /// Output positions of the red, green and blue channels.
    pub fn indices(self) -> [usize; 3] {
        match self {
            ChannelFormat::RGB => [0, 1, 2],
            ChannelFormat::RBG => [0, 2, 1],
            ChannelFormat::GRB => [1, 0, 2],
            ChannelFormat::GBR => [2, 0, 1],
            ChannelFormat::BRG => [1, 2, 0],
            ChannelFormat::BGR => [2, 1, 0],
        }
    }

    /// Reorders one RGB pixel into this format.
    pub fn apply(self, rgb: [u8; 3]) -> [u8; 3] {
        let mut out = [0; 3];

        for (value, index) in rgb.iter().zip(self.indices()) {
            out[index] = *value;
        }
        out
    }
}
