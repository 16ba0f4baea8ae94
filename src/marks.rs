use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Stable identity of a race entrant. Never the display number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntrantId(pub u32);

impl fmt::Display for EntrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkCategory {
    Primary,
    Secondary,
    DarkHorse,
    Contender,
    LongShot,
}

impl MarkCategory {
    /// Priority order; lookups resolve in this order too.
    pub const ALL: [MarkCategory; 5] = [
        MarkCategory::Primary,
        MarkCategory::Secondary,
        MarkCategory::DarkHorse,
        MarkCategory::Contender,
        MarkCategory::LongShot,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            MarkCategory::Primary => "◎",
            MarkCategory::Secondary => "○",
            MarkCategory::DarkHorse => "▲",
            MarkCategory::Contender => "△",
            MarkCategory::LongShot => "☆",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MarkCategory::Primary => "Primary",
            MarkCategory::Secondary => "Secondary",
            MarkCategory::DarkHorse => "Dark horse",
            MarkCategory::Contender => "Contender",
            MarkCategory::LongShot => "Long shot",
        }
    }

    /// Contender and LongShot may be held by several entrants at once.
    pub fn is_plural(self) -> bool {
        matches!(self, MarkCategory::Contender | MarkCategory::LongShot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuyState {
    #[default]
    None,
    /// "axis"
    Primary,
    /// "cover"
    Secondary,
}

impl BuyState {
    /// None -> Primary -> Secondary -> None.
    pub fn next(self) -> Self {
        match self {
            BuyState::None => BuyState::Primary,
            BuyState::Primary => BuyState::Secondary,
            BuyState::Secondary => BuyState::None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BuyState::None => "",
            BuyState::Primary => "軸",
            BuyState::Secondary => "押",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BuyState::None => "-",
            BuyState::Primary => "Axis",
            BuyState::Secondary => "Cover",
        }
    }
}

/// One user's marks and buy annotations for one race.
///
/// Field names on the wire follow the remote API (`honmei`, `taikou`,
/// `tanana`, `renka`, `ana`, `jiku`, `osae`). Older records may omit the
/// array fields or send `null`; both decode as empty sets.
///
/// Mutation goes through [`MarkSheet::set_mark`], [`MarkSheet::toggle_buy`]
/// and [`MarkSheet::set_buy`], which keep every entrant in at most one mark
/// slot or set and in at most one buy set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSheet {
    #[serde(rename = "honmei", default)]
    primary: Option<EntrantId>,
    #[serde(rename = "taikou", default)]
    secondary: Option<EntrantId>,
    #[serde(rename = "tanana", default)]
    dark_horse: Option<EntrantId>,
    #[serde(rename = "renka", default, deserialize_with = "null_as_empty")]
    contender: Vec<EntrantId>,
    #[serde(rename = "ana", default, deserialize_with = "null_as_empty")]
    long_shot: Vec<EntrantId>,
    #[serde(rename = "jiku", default, deserialize_with = "null_as_empty")]
    axis: Vec<EntrantId>,
    #[serde(rename = "osae", default, deserialize_with = "null_as_empty")]
    cover: Vec<EntrantId>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<EntrantId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<EntrantId>>::deserialize(deserializer)?.unwrap_or_default())
}

impl MarkSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `mark` to `id`, or clears it when `mark` is `None`.
    ///
    /// The entrant is first removed from every slot and set. A singleton
    /// rank then evicts its previous holder.
    pub fn set_mark(&mut self, id: EntrantId, mark: Option<MarkCategory>) {
        self.clear_mark(id);
        match mark {
            Some(MarkCategory::Primary) => self.primary = Some(id),
            Some(MarkCategory::Secondary) => self.secondary = Some(id),
            Some(MarkCategory::DarkHorse) => self.dark_horse = Some(id),
            Some(MarkCategory::Contender) => self.contender.push(id),
            Some(MarkCategory::LongShot) => self.long_shot.push(id),
            None => {}
        }
    }

    pub fn clear_mark(&mut self, id: EntrantId) {
        for slot in [&mut self.primary, &mut self.secondary, &mut self.dark_horse] {
            if *slot == Some(id) {
                *slot = None;
            }
        }
        self.contender.retain(|e| *e != id);
        self.long_shot.retain(|e| *e != id);
    }

    pub fn toggle_buy(&mut self, id: EntrantId) {
        if self.axis.contains(&id) {
            self.axis.retain(|e| *e != id);
            self.cover.push(id);
        } else if self.cover.contains(&id) {
            self.cover.retain(|e| *e != id);
        } else {
            self.axis.push(id);
        }
    }

    pub fn set_buy(&mut self, id: EntrantId, state: BuyState) {
        self.axis.retain(|e| *e != id);
        self.cover.retain(|e| *e != id);
        match state {
            BuyState::Primary => self.axis.push(id),
            BuyState::Secondary => self.cover.push(id),
            BuyState::None => {}
        }
    }

    pub fn mark_of(&self, id: EntrantId) -> Option<MarkCategory> {
        if self.primary == Some(id) {
            Some(MarkCategory::Primary)
        } else if self.secondary == Some(id) {
            Some(MarkCategory::Secondary)
        } else if self.dark_horse == Some(id) {
            Some(MarkCategory::DarkHorse)
        } else if self.contender.contains(&id) {
            Some(MarkCategory::Contender)
        } else if self.long_shot.contains(&id) {
            Some(MarkCategory::LongShot)
        } else {
            None
        }
    }

    pub fn buy_of(&self, id: EntrantId) -> BuyState {
        if self.axis.contains(&id) {
            BuyState::Primary
        } else if self.cover.contains(&id) {
            BuyState::Secondary
        } else {
            BuyState::None
        }
    }

    /// Entrants currently holding `mark`, in assignment order.
    pub fn holders(&self, mark: MarkCategory) -> Vec<EntrantId> {
        match mark {
            MarkCategory::Primary => self.primary.into_iter().collect(),
            MarkCategory::Secondary => self.secondary.into_iter().collect(),
            MarkCategory::DarkHorse => self.dark_horse.into_iter().collect(),
            MarkCategory::Contender => self.contender.clone(),
            MarkCategory::LongShot => self.long_shot.clone(),
        }
    }

    pub fn buyers(&self, state: BuyState) -> &[EntrantId] {
        match state {
            BuyState::Primary => &self.axis,
            BuyState::Secondary => &self.cover,
            BuyState::None => &[],
        }
    }

    pub fn marked_count(&self) -> usize {
        [self.primary, self.secondary, self.dark_horse]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
            + self.contender.len()
            + self.long_shot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked_count() == 0 && self.axis.is_empty() && self.cover.is_empty()
    }

    /// Rebuilds a decoded sheet so it satisfies the exclusivity rules.
    ///
    /// Conflicts resolve with the lookup precedence: the first slot or set
    /// an entrant is found in wins, duplicates inside a set collapse.
    pub fn normalized(self) -> Self {
        let mut out = MarkSheet::default();
        let singles = [
            (self.primary, MarkCategory::Primary),
            (self.secondary, MarkCategory::Secondary),
            (self.dark_horse, MarkCategory::DarkHorse),
        ];
        for (slot, mark) in singles {
            if let Some(id) = slot
                && out.mark_of(id).is_none()
            {
                out.set_mark(id, Some(mark));
            }
        }
        for (set, mark) in [
            (&self.contender, MarkCategory::Contender),
            (&self.long_shot, MarkCategory::LongShot),
        ] {
            for id in set {
                if out.mark_of(*id).is_none() {
                    out.set_mark(*id, Some(mark));
                }
            }
        }
        for (set, state) in [(&self.axis, BuyState::Primary), (&self.cover, BuyState::Secondary)] {
            for id in set {
                if out.buy_of(*id) == BuyState::None {
                    out.set_buy(*id, state);
                }
            }
        }
        out
    }
}
