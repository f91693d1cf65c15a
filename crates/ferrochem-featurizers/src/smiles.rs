//! SMILES reader.
//!
//! Supports the organic subset, aromatic atoms, bracket atoms
//! (`[isotope symbol chirality Hcount charge :class]`), explicit bonds, branches, ring closures
//! (`1`..`9`, `%nn`) and dot-separated fragments. Stereo bonds `/` and `\` read as single bonds.
use crate::molecule::{atomic_number, Atom, Bond, BondOrder, Chirality, Molecule};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SmilesError {
    #[error("empty SMILES string")]
    Empty,
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unknown element '{symbol}' at position {pos}")]
    UnknownElement { symbol: String, pos: usize },
    #[error("unclosed bracket atom starting at position {0}")]
    UnclosedBracket(usize),
    #[error("unbalanced parenthesis at position {0}")]
    UnbalancedParenthesis(usize),
    #[error("ring closure {0} is never closed")]
    UnclosedRing(u32),
    #[error("bond at position {0} is not followed by an atom")]
    DanglingBond(usize),
    #[error("{field} at position {pos} is out of range")]
    OutOfRange { field: &'static str, pos: usize },
    #[error("invalid molecule: {0}")]
    Invalid(String),
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    prev: Option<usize>,
    branches: Vec<usize>,
    pending_bond: Option<(BondOrder, usize)>,
    rings: HashMap<u32, (usize, Option<BondOrder>)>,
}

impl Parser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            atoms: Vec::new(),
            bonds: Vec::new(),
            prev: None,
            branches: Vec::new(),
            pending_bond: None,
            rings: HashMap::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn unexpected(&self) -> SmilesError {
        match self.peek() {
            Some(ch) => SmilesError::UnexpectedChar { ch, pos: self.pos },
            None => SmilesError::UnexpectedChar {
                ch: '\0',
                pos: self.pos,
            },
        }
    }

    fn default_order(&self, a: usize, b: usize) -> BondOrder {
        if self.atoms[a].aromatic && self.atoms[b].aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        }
    }

    fn add_atom(&mut self, atom: Atom) {
        let idx = self.atoms.len();
        self.atoms.push(atom);
        if let Some(prev) = self.prev {
            let order = match self.pending_bond.take() {
                Some((order, _)) => order,
                None => self.default_order(prev, idx),
            };
            self.bonds.push(Bond {
                begin: prev,
                end: idx,
                order,
            });
        }
        self.pending_bond = None;
        self.prev = Some(idx);
    }

    fn organic_atom(&mut self) -> Result<(), SmilesError> {
        let start = self.pos;
        let c = self.chars[self.pos];
        let next = self.chars.get(self.pos + 1).copied();
        let (symbol, aromatic, len) = match (c, next) {
            ('C', Some('l')) => ("Cl".to_string(), false, 2),
            ('B', Some('r')) => ("Br".to_string(), false, 2),
            ('B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I', _) => (c.to_string(), false, 1),
            ('b' | 'c' | 'n' | 'o' | 'p' | 's', _) => (c.to_ascii_uppercase().to_string(), true, 1),
            ('*', _) => ("*".to_string(), false, 1),
            _ => return Err(self.unexpected()),
        };
        let z = if symbol == "*" {
            0
        } else {
            atomic_number(&symbol).ok_or(SmilesError::UnknownElement { symbol, pos: start })?
        };
        let mut atom = Atom::new(z);
        atom.aromatic = aromatic;
        self.pos += len;
        self.add_atom(atom);
        Ok(())
    }

    /// Digits at the cursor, if any. `field` names the value in the overflow error.
    fn number(&mut self, field: &'static str) -> Result<Option<u32>, SmilesError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .map(Some)
            .map_err(|_| SmilesError::OutOfRange { field, pos: start })
    }

    fn bracket_atom(&mut self) -> Result<(), SmilesError> {
        let open = self.pos;
        self.pos += 1;
        let isotope_at = self.pos;
        let isotope = self
            .number("isotope")?
            .map(u16::try_from)
            .transpose()
            .map_err(|_| SmilesError::OutOfRange {
                field: "isotope",
                pos: isotope_at,
            })?;

        // element symbol: aromatic two-letter forms first, then Xx, then X, then aromatic x
        let c = self.peek().ok_or(SmilesError::UnclosedBracket(open))?;
        let next = self.chars.get(self.pos + 1).copied();
        let (symbol, aromatic) = match (c, next) {
            ('s', Some('e')) => ("Se".to_string(), true),
            ('a', Some('s')) => ("As".to_string(), true),
            ('b' | 'c' | 'n' | 'o' | 'p' | 's', _) => (c.to_ascii_uppercase().to_string(), true),
            ('*', _) => ("*".to_string(), false),
            (u, Some(l)) if u.is_ascii_uppercase() && l.is_ascii_lowercase() => {
                let two = format!("{}{}", u, l);
                if atomic_number(&two).is_some() {
                    (two, false)
                } else {
                    (u.to_string(), false)
                }
            }
            (u, _) if u.is_ascii_uppercase() => (u.to_string(), false),
            _ => return Err(self.unexpected()),
        };
        let z = if symbol == "*" {
            0
        } else {
            atomic_number(&symbol).ok_or(SmilesError::UnknownElement {
                symbol: symbol.clone(),
                pos: self.pos,
            })?
        };
        self.pos += symbol.len();

        let mut chirality = None;
        if self.peek() == Some('@') {
            self.pos += 1;
            chirality = Some(Chirality::CounterClockwise);
            if self.peek() == Some('@') {
                self.pos += 1;
                chirality = Some(Chirality::Clockwise);
            }
        }

        let mut hydrogens = 0u8;
        if self.peek() == Some('H') {
            self.pos += 1;
            let at = self.pos;
            hydrogens = u8::try_from(self.number("hydrogen count")?.unwrap_or(1)).map_err(|_| {
                SmilesError::OutOfRange {
                    field: "hydrogen count",
                    pos: at,
                }
            })?;
        }

        let mut charge: i8 = 0;
        while let Some(sign @ ('+' | '-')) = self.peek() {
            let at = self.pos;
            self.pos += 1;
            let magnitude = self.number("charge")?.unwrap_or(1);
            let delta = i64::from(magnitude) * if sign == '+' { 1 } else { -1 };
            charge = i8::try_from(i64::from(charge) + delta).map_err(|_| SmilesError::OutOfRange {
                field: "charge",
                pos: at,
            })?;
        }

        if self.peek() == Some(':') {
            self.pos += 1;
            self.number("atom class")?.ok_or_else(|| self.unexpected())?;
        }

        if self.peek() != Some(']') {
            return Err(if self.peek().is_none() {
                SmilesError::UnclosedBracket(open)
            } else {
                self.unexpected()
            });
        }
        self.pos += 1;

        let mut atom = Atom::new(z);
        atom.aromatic = aromatic;
        atom.isotope = isotope;
        atom.chirality = chirality;
        atom.explicit_hydrogens = Some(hydrogens);
        atom.formal_charge = charge;
        self.add_atom(atom);
        Ok(())
    }

    fn ring_closure(&mut self) -> Result<(), SmilesError> {
        let at = self.pos;
        let label = if self.peek() == Some('%') {
            self.pos += 1;
            let digits: String = self.chars[self.pos..].iter().take(2).collect();
            if digits.len() != 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(self.unexpected());
            }
            self.pos += 2;
            digits.parse().map_err(|_| self.unexpected())?
        } else {
            let digit = self.chars[self.pos].to_digit(10).ok_or_else(|| self.unexpected())?;
            self.pos += 1;
            digit
        };
        let current = self.prev.ok_or(SmilesError::UnexpectedChar {
            ch: self.chars[at],
            pos: at,
        })?;
        let bond = self.pending_bond.take().map(|(order, _)| order);
        match self.rings.remove(&label) {
            Some((partner, opened_with)) => {
                if partner == current {
                    return Err(SmilesError::Invalid(format!(
                        "ring closure {} bonds an atom to itself",
                        label
                    )));
                }
                let order = bond
                    .or(opened_with)
                    .unwrap_or_else(|| self.default_order(partner, current));
                self.bonds.push(Bond {
                    begin: partner,
                    end: current,
                    order,
                });
            }
            None => {
                self.rings.insert(label, (current, bond));
            }
        }
        Ok(())
    }

    fn parse(mut self) -> Result<Molecule, SmilesError> {
        if self.chars.iter().all(|c| c.is_whitespace()) {
            return Err(SmilesError::Empty);
        }
        while let Some(c) = self.peek() {
            match c {
                '(' => {
                    let prev = self.prev.ok_or(SmilesError::UnbalancedParenthesis(self.pos))?;
                    self.branches.push(prev);
                    self.pos += 1;
                }
                ')' => {
                    if self.pending_bond.is_some() {
                        return Err(SmilesError::DanglingBond(self.pos));
                    }
                    self.prev = Some(
                        self.branches
                            .pop()
                            .ok_or(SmilesError::UnbalancedParenthesis(self.pos))?,
                    );
                    self.pos += 1;
                }
                '-' | '=' | '#' | '$' | ':' | '/' | '\\' => {
                    if self.pending_bond.is_some() || self.prev.is_none() {
                        return Err(self.unexpected());
                    }
                    let order = match c {
                        '=' => BondOrder::Double,
                        '#' => BondOrder::Triple,
                        '$' => BondOrder::Quadruple,
                        ':' => BondOrder::Aromatic,
                        _ => BondOrder::Single,
                    };
                    self.pending_bond = Some((order, self.pos));
                    self.pos += 1;
                }
                '.' => {
                    if let Some((_, at)) = self.pending_bond {
                        return Err(SmilesError::DanglingBond(at));
                    }
                    self.prev = None;
                    self.pos += 1;
                }
                '[' => self.bracket_atom()?,
                '%' | '0'..='9' => self.ring_closure()?,
                c if c.is_whitespace() => break,
                _ => self.organic_atom()?,
            }
        }
        if let Some((_, at)) = self.pending_bond {
            return Err(SmilesError::DanglingBond(at));
        }
        if !self.branches.is_empty() {
            return Err(SmilesError::UnbalancedParenthesis(self.pos));
        }
        if let Some(label) = self.rings.keys().min() {
            return Err(SmilesError::UnclosedRing(*label));
        }
        Molecule::new(self.atoms, self.bonds).map_err(|e| SmilesError::Invalid(e.to_string()))
    }
}

/// Parse a SMILES string into a [`Molecule`]. Anything after the first whitespace (a name or
/// comment column) is ignored.
pub fn parse_smiles(smiles: &str) -> anyhow::Result<Molecule> {
    Ok(Parser::new(smiles.trim_start()).parse()?)
}
