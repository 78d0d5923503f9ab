//! Chart primitives: stems, branches, elements and pillars.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    /// 木
    Wood,
    /// 火
    Fire,
    /// 土
    Earth,
    /// 金
    Metal,
    /// 水
    Water,
}

impl Element {
    /// All elements in generating-cycle order.
    pub const ALL: [Self; 5] = [Self::Wood, Self::Fire, Self::Earth, Self::Metal, Self::Water];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wood => "wood",
            Self::Fire => "fire",
            Self::Earth => "earth",
            Self::Metal => "metal",
            Self::Water => "water",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Yin or yang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// 陽
    Yang,
    /// 陰
    Yin,
}

impl Polarity {
    const fn from_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::Yang
        } else {
            Self::Yin
        }
    }
}

/// The ten heavenly stems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stem {
    /// 甲
    Gap,
    /// 乙
    Eul,
    /// 丙
    Byeong,
    /// 丁
    Jeong,
    /// 戊
    Mu,
    /// 己
    Gi,
    /// 庚
    Gyeong,
    /// 辛
    Sin,
    /// 壬
    Im,
    /// 癸
    Gye,
}

impl Stem {
    /// All stems in cycle order.
    pub const ALL: [Self; 10] = [
        Self::Gap,
        Self::Eul,
        Self::Byeong,
        Self::Jeong,
        Self::Mu,
        Self::Gi,
        Self::Gyeong,
        Self::Sin,
        Self::Im,
        Self::Gye,
    ];

    /// The stem's element.
    #[must_use]
    pub const fn element(self) -> Element {
        match self {
            Self::Gap | Self::Eul => Element::Wood,
            Self::Byeong | Self::Jeong => Element::Fire,
            Self::Mu | Self::Gi => Element::Earth,
            Self::Gyeong | Self::Sin => Element::Metal,
            Self::Im | Self::Gye => Element::Water,
        }
    }

    /// The stem's polarity.
    #[must_use]
    pub const fn polarity(self) -> Polarity {
        Polarity::from_index(self as usize)
    }

    /// The Chinese character.
    #[must_use]
    pub const fn hanja(self) -> &'static str {
        match self {
            Self::Gap => "甲",
            Self::Eul => "乙",
            Self::Byeong => "丙",
            Self::Jeong => "丁",
            Self::Mu => "戊",
            Self::Gi => "己",
            Self::Gyeong => "庚",
            Self::Sin => "辛",
            Self::Im => "壬",
            Self::Gye => "癸",
        }
    }
}

/// The twelve earthly branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// 子
    Ja,
    /// 丑
    Chuk,
    /// 寅
    In,
    /// 卯
    Myo,
    /// 辰
    Jin,
    /// 巳
    Sa,
    /// 午
    O,
    /// 未
    Mi,
    /// 申
    Shin,
    /// 酉
    Yu,
    /// 戌
    Sul,
    /// 亥
    Hae,
}

impl Branch {
    /// All branches in cycle order.
    pub const ALL: [Self; 12] = [
        Self::Ja,
        Self::Chuk,
        Self::In,
        Self::Myo,
        Self::Jin,
        Self::Sa,
        Self::O,
        Self::Mi,
        Self::Shin,
        Self::Yu,
        Self::Sul,
        Self::Hae,
    ];

    /// The branch's element.
    #[must_use]
    pub const fn element(self) -> Element {
        match self {
            Self::In | Self::Myo => Element::Wood,
            Self::Sa | Self::O => Element::Fire,
            Self::Chuk | Self::Jin | Self::Mi | Self::Sul => Element::Earth,
            Self::Shin | Self::Yu => Element::Metal,
            Self::Hae | Self::Ja => Element::Water,
        }
    }

    /// The branch's polarity.
    #[must_use]
    pub const fn polarity(self) -> Polarity {
        Polarity::from_index(self as usize)
    }

    /// The Chinese character.
    #[must_use]
    pub const fn hanja(self) -> &'static str {
        match self {
            Self::Ja => "子",
            Self::Chuk => "丑",
            Self::In => "寅",
            Self::Myo => "卯",
            Self::Jin => "辰",
            Self::Sa => "巳",
            Self::O => "午",
            Self::Mi => "未",
            Self::Shin => "申",
            Self::Yu => "酉",
            Self::Sul => "戌",
            Self::Hae => "亥",
        }
    }
}

/// Which of the four pillars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillarPosition {
    /// Year pillar.
    Year,
    /// Month pillar.
    Month,
    /// Day pillar; its stem is the day master.
    Day,
    /// Hour pillar.
    Hour,
}

impl PillarPosition {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
        }
    }
}

/// One stem/branch pair.
///
/// The element fields are optional echoes of what the caller computed; when
/// present they must agree with the stem and branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pillar {
    /// Heavenly stem.
    pub stem: Stem,
    /// Earthly branch.
    pub branch: Branch,
    /// Declared element of the stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stem_element: Option<Element>,
    /// Declared element of the branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_element: Option<Element>,
}

impl Pillar {
    /// Creates a pillar without declared elements.
    #[must_use]
    pub const fn new(stem: Stem, branch: Branch) -> Self {
        Self {
            stem,
            branch,
            stem_element: None,
            branch_element: None,
        }
    }

    /// Declares the elements explicitly.
    #[must_use]
    pub const fn with_elements(mut self, stem_element: Element, branch_element: Element) -> Self {
        self.stem_element = Some(stem_element);
        self.branch_element = Some(branch_element);
        self
    }

    /// Stem and branch characters, e.g. `甲子`.
    #[must_use]
    pub fn hanja(&self) -> String {
        format!("{}{}", self.stem.hanja(), self.branch.hanja())
    }
}

/// The four pillars of a birth chart.
///
/// The hour pillar is optional since birth time is often unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pillars {
    /// Year pillar.
    pub year: Pillar,
    /// Month pillar.
    pub month: Pillar,
    /// Day pillar.
    pub day: Pillar,
    /// Hour pillar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<Pillar>,
}

impl Pillars {
    /// Iterates the populated pillars in year, month, day, hour order.
    pub fn iter(&self) -> impl Iterator<Item = (PillarPosition, &Pillar)> {
        [
            (PillarPosition::Year, Some(&self.year)),
            (PillarPosition::Month, Some(&self.month)),
            (PillarPosition::Day, Some(&self.day)),
            (PillarPosition::Hour, self.hour.as_ref()),
        ]
        .into_iter()
        .filter_map(|(position, pillar)| pillar.map(|p| (position, p)))
    }

    /// The day stem.
    #[must_use]
    pub const fn day_master(&self) -> Stem {
        self.day.stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_elements_and_polarity() {
        assert_eq!(Stem::Gap.element(), Element::Wood);
        assert_eq!(Stem::Gap.polarity(), Polarity::Yang);
        assert_eq!(Stem::Gye.element(), Element::Water);
        assert_eq!(Stem::Gye.polarity(), Polarity::Yin);
    }

    #[test]
    fn test_branch_elements() {
        let earth = Branch::ALL
            .iter()
            .filter(|b| b.element() == Element::Earth)
            .count();
        assert_eq!(earth, 4);
        assert_eq!(Branch::Ja.element(), Element::Water);
        assert_eq!(Branch::Shin.element(), Element::Metal);
    }

    #[test]
    fn test_pillar_hanja() {
        assert_eq!(Pillar::new(Stem::Gap, Branch::Ja).hanja(), "甲子");
    }

    #[test]
    fn test_pillars_iter_skips_missing_hour() {
        let pillars = Pillars {
            year: Pillar::new(Stem::Gap, Branch::Ja),
            month: Pillar::new(Stem::Byeong, Branch::In),
            day: Pillar::new(Stem::Mu, Branch::Jin),
            hour: None,
        };
        let positions: Vec<_> = pillars.iter().map(|(pos, _)| pos).collect();
        assert_eq!(
            positions,
            vec![PillarPosition::Year, PillarPosition::Month, PillarPosition::Day]
        );
        assert_eq!(pillars.day_master(), Stem::Mu);
    }
}
