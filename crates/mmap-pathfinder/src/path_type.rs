use bitflags::bitflags;

bitflags! {
    /// Classification of a computed path
    ///
    /// `SHORTCUT`, `NOT_USING_PATH` and `DEST_FORCED` combine with one of the
    /// outcome flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PathType: u16 {
        /// Nothing computed yet
        const BLANK = 0x01;
        /// The path reaches the end polygon
        const NORMAL = 0x02;
        /// Straight line from start to end instead of a computed path
        const SHORTCUT = 0x04;
        /// The path gets closer to the target without reaching it
        const INCOMPLETE = 0x08;
        /// No usable path; the points are a straight line only
        const NOPATH = 0x10;
        /// No mesh was consulted for the points
        const NOT_USING_PATH = 0x20;
        /// The last point was replaced by the requested end
        const DEST_FORCED = 0x40;
    }
}

impl Default for PathType {
    fn default() -> Self {
        PathType::BLANK
    }
}
