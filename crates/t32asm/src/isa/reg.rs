//! Register definitions

/// T32 general-purpose register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register(u8);

impl Register {
    pub const R0: Register = Register(0);
    pub const R1: Register = Register(1);
    pub const R2: Register = Register(2);
    pub const R3: Register = Register(3);
    pub const R4: Register = Register(4);
    pub const R5: Register = Register(5);
    pub const R6: Register = Register(6);
    pub const R7: Register = Register(7);
    pub const IP: Register = Register(12);
    pub const SP: Register = Register(13);
    pub const LR: Register = Register(14);
    pub const PC: Register = Register(15);

    pub fn new(num: u8) -> Option<Register> {
        if num < 16 { Some(Register(num)) } else { None }
    }

    pub fn num(self) -> u8 {
        self.0
    }

    /// r0-r7, addressable by narrow encodings
    pub fn is_low(self) -> bool {
        self.0 < 8
    }

    pub fn is_sp(self) -> bool {
        self.0 == 13
    }

    pub fn is_pc(self) -> bool {
        self.0 == 15
    }

    /// Parse a register name, including the architectural aliases
    pub fn parse(name: &str) -> Option<Register> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "fp" => return Some(Register(11)),
            "ip" => return Some(Register(12)),
            "sp" => return Some(Register(13)),
            "lr" => return Some(Register(14)),
            "pc" => return Some(Register(15)),
            _ => {}
        }
        let rest = lower.strip_prefix('r')?;
        let num: u8 = rest.parse().ok()?;
        Register::new(num)
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            13 => write!(f, "sp"),
            14 => write!(f, "lr"),
            15 => write!(f, "pc"),
            n => write!(f, "r{}", n),
        }
    }
}

/// Vector register q0-q7 (vector-predication extension)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QReg(u8);

impl QReg {
    pub fn new(num: u8) -> Option<QReg> {
        if num < 8 { Some(QReg(num)) } else { None }
    }

    pub fn num(self) -> u8 {
        self.0
    }

    pub fn parse(name: &str) -> Option<QReg> {
        let rest = name.to_ascii_lowercase().strip_prefix('q')?.to_string();
        let num: u8 = rest.parse().ok()?;
        QReg::new(num)
    }
}

impl std::fmt::Display for QReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Register::parse("sp"), Some(Register::SP));
        assert_eq!(Register::parse("r13"), Some(Register::SP));
        assert_eq!(Register::parse("PC"), Some(Register::PC));
        assert_eq!(Register::parse("fp"), Register::new(11));
        assert_eq!(Register::parse("r16"), None);
        assert_eq!(Register::parse("rx"), None);
    }

    #[test]
    fn test_low_registers() {
        assert!(Register::R7.is_low());
        assert!(!Register::IP.is_low());
        assert!(!Register::SP.is_low());
    }

    #[test]
    fn test_qreg() {
        assert_eq!(QReg::parse("q3").map(QReg::num), Some(3));
        assert_eq!(QReg::parse("q8"), None);
        assert_eq!(QReg::parse("r3"), None);
    }
}
