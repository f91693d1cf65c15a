//! Molecular graph used by every structure-based featurizer.
//!
//! A [`Molecule`] is a list of atoms, a list of bonds and, when read from an XYZ file, one 3D
//! coordinate per atom (Angstrom). Hydrogens may be explicit atoms or implied by valence.
use anyhow::{anyhow, bail, Context, Result};
use std::collections::VecDeque;

#[rustfmt::skip]
const ELEMENT_LIST: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Atomic number of an element symbol (case-sensitive, e.g. `"Cl"`).
pub fn atomic_number(symbol: &str) -> Option<u8> {
    ELEMENT_LIST
        .iter()
        .position(|&s| s == symbol)
        .map(|i| (i + 1) as u8)
}

/// Element symbol of an atomic number; `"*"` for 0 (wildcard).
pub fn element_symbol(atomic_number: u8) -> &'static str {
    match atomic_number {
        0 => "*",
        n => ELEMENT_LIST.get(n as usize - 1).copied().unwrap_or("*"),
    }
}

#[rustfmt::skip]
fn default_valences(atomic_number: u8) -> &'static [u8] {
    match atomic_number {
        5 => &[3],
        6 => &[4],
        7 | 15 => &[3, 5],
        8 => &[2],
        16 => &[2, 4, 6],
        9 | 17 | 35 | 53 => &[1],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chirality {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub atomic_number: u8,
    pub formal_charge: i8,
    pub aromatic: bool,
    /// Set for bracket atoms and atoms read with coordinates; implicit hydrogens are then zero.
    pub explicit_hydrogens: Option<u8>,
    pub isotope: Option<u16>,
    pub chirality: Option<Chirality>,
}

impl Atom {
    pub fn new(atomic_number: u8) -> Self {
        Self {
            atomic_number,
            formal_charge: 0,
            aromatic: false,
            explicit_hydrogens: None,
            isotope: None,
            chirality: None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        element_symbol(self.atomic_number)
    }

    pub fn is_hydrogen(&self) -> bool {
        self.atomic_number == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Quadruple,
    Aromatic,
}

impl BondOrder {
    /// Contribution to valence; aromatic bonds count as one here and the extra electron is
    /// added once per aromatic atom.
    fn valence(self) -> u8 {
        match self {
            BondOrder::Single | BondOrder::Aromatic => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Quadruple => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bond {
    pub begin: usize,
    pub end: usize,
    pub order: BondOrder,
}

impl Bond {
    pub fn other(&self, atom: usize) -> usize {
        if self.begin == atom {
            self.end
        } else {
            self.begin
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Molecule {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    coords: Option<Vec<[f64; 3]>>,
    /// `(neighbour, bond index)` per atom.
    adjacency: Vec<Vec<(usize, usize)>>,
}

impl Molecule {
    pub fn new(atoms: Vec<Atom>, bonds: Vec<Bond>) -> Result<Self> {
        let mut adjacency = vec![Vec::new(); atoms.len()];
        for (idx, bond) in bonds.iter().enumerate() {
            if bond.begin >= atoms.len() || bond.end >= atoms.len() {
                bail!("bond {} references a missing atom", idx);
            }
            if bond.begin == bond.end {
                bail!("bond {} connects atom {} to itself", idx, bond.begin);
            }
            adjacency[bond.begin].push((bond.end, idx));
            adjacency[bond.end].push((bond.begin, idx));
        }
        Ok(Self {
            atoms,
            bonds,
            coords: None,
            adjacency,
        })
    }

    pub fn with_coords(mut self, coords: Vec<[f64; 3]>) -> Result<Self> {
        if coords.len() != self.atoms.len() {
            bail!(
                "{} coordinates given for {} atoms",
                coords.len(),
                self.atoms.len()
            );
        }
        self.coords = Some(coords);
        Ok(self)
    }

    pub fn from_smiles(smiles: &str) -> Result<Self> {
        crate::smiles::parse_smiles(smiles)
    }

    /// Parse an XYZ file: atom count, comment line, then `symbol x y z` rows.
    /// Atoms carry no bonds and no implicit hydrogens.
    pub fn from_xyz(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let count: usize = lines
            .next()
            .ok_or_else(|| anyhow!("empty XYZ input"))?
            .trim()
            .parse()
            .context("first XYZ line must be the atom count")?;
        lines.next();

        let mut atoms = Vec::with_capacity(count);
        let mut coords = Vec::with_capacity(count);
        for (row, line) in lines.filter(|l| !l.trim().is_empty()).take(count).enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                bail!("XYZ row {} has {} fields, expected 4", row, fields.len());
            }
            let z = atomic_number(fields[0])
                .ok_or_else(|| anyhow!("unknown element '{}' in XYZ row {}", fields[0], row))?;
            let mut xyz = [0.0; 3];
            for (axis, value) in fields[1..4].iter().enumerate() {
                xyz[axis] = value
                    .parse()
                    .with_context(|| format!("bad coordinate '{}' in XYZ row {}", value, row))?;
            }
            let mut atom = Atom::new(z);
            atom.explicit_hydrogens = Some(0);
            atoms.push(atom);
            coords.push(xyz);
        }
        if atoms.len() != count {
            bail!("XYZ header declares {} atoms, found {}", count, atoms.len());
        }
        Molecule::new(atoms, Vec::new())?.with_coords(coords)
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn coords(&self) -> Option<&[[f64; 3]]> {
        self.coords.as_deref()
    }

    pub fn neighbors(&self, atom: usize) -> &[(usize, usize)] {
        &self.adjacency[atom]
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.adjacency[atom].len()
    }

    pub fn implicit_hydrogens(&self, atom: usize) -> u8 {
        let a = &self.atoms[atom];
        if a.explicit_hydrogens.is_some() {
            return 0;
        }
        let mut used: usize = self.adjacency[atom]
            .iter()
            .map(|&(_, b)| self.bonds[b].order.valence() as usize)
            .sum();
        if a.aromatic {
            used += 1;
        }
        default_valences(a.atomic_number)
            .iter()
            .map(|&v| v as usize)
            .find(|&v| v >= used)
            .map_or(0, |v| (v - used) as u8)
    }

    /// Bracket/explicit hydrogens, implied hydrogens and bonded hydrogen atoms.
    pub fn total_hydrogens(&self, atom: usize) -> u32 {
        let bonded = self.adjacency[atom]
            .iter()
            .filter(|&&(n, _)| self.atoms[n].is_hydrogen())
            .count() as u32;
        u32::from(self.atoms[atom].explicit_hydrogens.unwrap_or(0))
            + u32::from(self.implicit_hydrogens(atom))
            + bonded
    }

    /// Number of non-hydrogen neighbours.
    pub fn heavy_degree(&self, atom: usize) -> usize {
        self.adjacency[atom]
            .iter()
            .filter(|&&(n, _)| !self.atoms[n].is_hydrogen())
            .count()
    }

    /// A bond is in a ring when its ends stay connected without it.
    pub fn ring_bonds(&self) -> Vec<bool> {
        (0..self.bonds.len())
            .map(|b| {
                let Bond { begin, end, .. } = self.bonds[b];
                let mut seen = vec![false; self.atoms.len()];
                let mut queue = VecDeque::from([begin]);
                seen[begin] = true;
                while let Some(current) = queue.pop_front() {
                    for &(next, via) in &self.adjacency[current] {
                        if via == b || seen[next] {
                            continue;
                        }
                        if next == end {
                            return true;
                        }
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
                false
            })
            .collect()
    }

    pub fn ring_atoms(&self) -> Vec<bool> {
        let ring_bonds = self.ring_bonds();
        let mut in_ring = vec![false; self.atoms.len()];
        for (bond, _) in self.bonds.iter().zip(&ring_bonds).filter(|&(_, &r)| r) {
            in_ring[bond.begin] = true;
            in_ring[bond.end] = true;
        }
        in_ring
    }

    /// Copy without hydrogen atoms; coordinates follow the kept atoms.
    pub fn without_hydrogens(&self) -> Result<Molecule> {
        let keep: Vec<usize> = (0..self.atoms.len())
            .filter(|&i| !self.atoms[i].is_hydrogen())
            .collect();
        let mut new_index = vec![usize::MAX; self.atoms.len()];
        for (new, &old) in keep.iter().enumerate() {
            new_index[old] = new;
        }
        let atoms = keep.iter().map(|&i| self.atoms[i].clone()).collect();
        let bonds = self
            .bonds
            .iter()
            .filter(|b| new_index[b.begin] != usize::MAX && new_index[b.end] != usize::MAX)
            .map(|b| Bond {
                begin: new_index[b.begin],
                end: new_index[b.end],
                order: b.order,
            })
            .collect();
        let molecule = Molecule::new(atoms, bonds)?;
        match &self.coords {
            Some(coords) => molecule.with_coords(keep.iter().map(|&i| coords[i]).collect()),
            None => Ok(molecule),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrochem_test_data::TestFile;

    #[test]
    fn test_element_lookup() {
        assert_eq!(atomic_number("C"), Some(6));
        assert_eq!(atomic_number("Cl"), Some(17));
        assert_eq!(atomic_number("Xx"), None);
        assert_eq!(element_symbol(8), "O");
    }

    #[test]
    fn test_xyz_water() -> Result<()> {
        let mol = Molecule::from_xyz(TestFile::water_xyz().contents())?;
        assert_eq!(mol.num_atoms(), 3);
        assert_eq!(mol.atoms()[0].atomic_number, 8);
        assert_eq!(mol.coords().unwrap()[1], [0.0, 0.7572, -0.4692]);
        assert_eq!(mol.total_hydrogens(0), 0);
        let heavy = mol.without_hydrogens()?;
        assert_eq!(heavy.num_atoms(), 1);
        assert_eq!(heavy.coords().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn test_xyz_count_mismatch() {
        assert!(Molecule::from_xyz("2\ncomment\nO 0 0 0\n").is_err());
        assert!(Molecule::from_xyz("1\ncomment\nQq 0 0 0\n").is_err());
    }

    #[test]
    fn test_ring_detection() -> Result<()> {
        // cyclopropane with a methyl tail
        let atoms = vec![Atom::new(6); 4];
        let bonds = vec![
            Bond { begin: 0, end: 1, order: BondOrder::Single },
            Bond { begin: 1, end: 2, order: BondOrder::Single },
            Bond { begin: 2, end: 0, order: BondOrder::Single },
            Bond { begin: 2, end: 3, order: BondOrder::Single },
        ];
        let mol = Molecule::new(atoms, bonds)?;
        assert_eq!(mol.ring_bonds(), vec![true, true, true, false]);
        assert_eq!(mol.ring_atoms(), vec![true, true, true, false]);
        assert_eq!(mol.implicit_hydrogens(2), 1);
        assert_eq!(mol.implicit_hydrogens(3), 3);
        Ok(())
    }
}
