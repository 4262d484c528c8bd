//! Chemical element symbols indexed by atomic number.

const SYMBOLS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Return the atomic number for an element symbol.
///
/// Matching ignores case (`FE`, `fe` and `Fe` all resolve to 26) because
/// hand-edited files are not consistent about capitalisation.
pub fn atomic_number(symbol: &str) -> Option<i64> {
    SYMBOLS
        .iter()
        .position(|s| s.eq_ignore_ascii_case(symbol))
        .map(|idx| idx as i64 + 1)
}

/// Return the canonical symbol for an atomic number in `1..=118`.
pub fn symbol(atomic_number: i64) -> Option<&'static str> {
    if atomic_number < 1 {
        return None;
    }
    SYMBOLS.get(atomic_number as usize - 1).copied()
}

/// Hill-order chemical formula (carbon, hydrogen, then alphabetical; purely
/// alphabetical when no carbon is present). Unknown numbers render as `X`.
pub fn chemical_formula(atomic_numbers: &[i64]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for &z in atomic_numbers {
        let sym = symbol(z).unwrap_or("X");
        match counts.iter_mut().find(|(s, _)| *s == sym) {
            Some((_, n)) => *n += 1,
            None => counts.push((sym, 1)),
        }
    }
    let has_carbon = counts.iter().any(|(s, _)| *s == "C");
    counts.sort_by(|(a, _), (b, _)| {
        let rank = |s: &str| match (has_carbon, s) {
            (true, "C") => 0,
            (true, "H") => 1,
            _ => 2,
        };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
    let mut out = String::new();
    for (sym, n) in counts {
        out.push_str(sym);
        if n > 1 {
            out.push_str(&n.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_round_trip_through_numbers() {
        assert_eq!(atomic_number("H"), Some(1));
        assert_eq!(atomic_number("Pt"), Some(78));
        assert_eq!(atomic_number("sn"), Some(50));
        assert_eq!(atomic_number("Og"), Some(118));
        assert_eq!(atomic_number("Xx"), None);
        assert_eq!(symbol(26), Some("Fe"));
        assert_eq!(symbol(0), None);
        assert_eq!(symbol(119), None);
    }

    #[test]
    fn formula_uses_hill_order() {
        // CH4 with carbon listed last in the input.
        assert_eq!(chemical_formula(&[1, 1, 1, 1, 6]), "CH4");
        assert_eq!(chemical_formula(&[8, 1, 1]), "H2O");
        assert_eq!(chemical_formula(&[78, 78, 78, 78, 50]), "Pt4Sn");
    }
}
