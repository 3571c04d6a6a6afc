//
// Public Interface
//

/// All architecture tags the tool knows about, in declaration order.
/// The first eight double as the default try-order prefix.
pub const ARCHITECTURES: &[&str] = &[
    "x86_64",
    "i386",
    "arm",
    "arm64",
    "sparc64",
    "sparc",
    "powerpc",
    "mips",
    "alpha",
    "arc",
    "c6x",
    "csky",
    "h8300",
    "hexagon",
    "ia64",
    "m68k",
    "microblaze",
    "nds32",
    "nios2",
    "openrisc",
    "parisc",
    "riscv",
    "s390",
    "sh",
    "sh64",
    "um",
    "um32",
    "unicore32",
    "xtensa",
];

/// Number of leading entries of [`ARCHITECTURES`] that form the
/// default priority list when the user names no architecture.
pub const DEFAULT_PRIORITY: usize = 8;

/// Every `CONFIG_*` option whose truth value selects a target
/// architecture.
pub const ARCH_DEFINING: &[&str] = &[
    "CONFIG_ALPHA",
    "CONFIG_ARC",
    "CONFIG_ARM",
    "CONFIG_ARM64",
    "CONFIG_C6X",
    "CONFIG_CSKY",
    "CONFIG_H8300",
    "CONFIG_HEXAGON",
    "CONFIG_IA64",
    "CONFIG_M68K",
    "CONFIG_MICROBLAZE",
    "CONFIG_MIPS",
    "CONFIG_NDS32",
    "CONFIG_NIOS2",
    "CONFIG_OPENRISC",
    "CONFIG_PARISC",
    "CONFIG_PPC",
    "CONFIG_RISCV",
    "CONFIG_S390",
    "CONFIG_SUPERH",
    "CONFIG_SPARC",
    "CONFIG_UML",
    "CONFIG_UNICORE32",
    "CONFIG_X86",
    "CONFIG_XTENSA",
];

/// The literal bundle that pins the logical model to one architecture:
/// options forced on, options forced off (including every other
/// arch-defining option).
#[derive(Clone, Debug)]
pub struct ArchProfile {
    pub tag: String,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

pub fn is_arch_defining(name: &str) -> bool {
    ARCH_DEFINING.contains(&name)
}

/// Builds the constraint bundle for one architecture tag.
pub fn profile(tag: &str) -> ArchProfile {
    let mut positive: Vec<String>;
    let mut negative: Vec<String>;
    let keep: &[&str];

    match tag {
        "x86_64" => {
            positive = strings(&["CONFIG_X86", "CONFIG_X86_64", "BITS=64"]);
            negative = strings(&["CONFIG_X86_32", "BITS=32"]);
            keep = &["CONFIG_X86"];
        }
        "i386" => {
            positive = strings(&["CONFIG_X86", "CONFIG_X86_32", "BITS=32"]);
            negative = strings(&["CONFIG_X86_64", "BITS=64"]);
            keep = &["CONFIG_X86"];
        }
        "powerpc" => {
            // PPC32/PPC64 remain free
            positive = strings(&["CONFIG_PPC"]);
            negative = Vec::new();
            keep = &["CONFIG_PPC"];
        }
        "sh" => {
            positive = strings(&["CONFIG_SUPERH", "CONFIG_SUPERH32", "BITS=32"]);
            negative = strings(&["CONFIG_SUPERH64", "BITS=64"]);
            keep = &["CONFIG_SUPERH"];
        }
        "sh64" => {
            positive = strings(&["CONFIG_SUPERH", "CONFIG_SUPERH64", "BITS=64"]);
            negative = strings(&["CONFIG_SUPERH32", "BITS=32"]);
            keep = &["CONFIG_SUPERH"];
        }
        "sparc" => {
            positive = strings(&["CONFIG_SPARC", "CONFIG_SPARC32", "BITS=32"]);
            negative = strings(&["CONFIG_SPARC64", "BITS=64"]);
            keep = &["CONFIG_SPARC"];
        }
        "sparc64" => {
            positive = strings(&["CONFIG_SPARC", "CONFIG_SPARC64", "BITS=64"]);
            negative = strings(&["CONFIG_SPARC32", "BITS=32"]);
            keep = &["CONFIG_SPARC"];
        }
        "um" => {
            positive = strings(&["CONFIG_UML", "CONFIG_X86", "CONFIG_X86_64", "BITS=64"]);
            negative = strings(&["CONFIG_X86_32", "BITS=32"]);
            keep = &["CONFIG_UML", "CONFIG_X86"];
        }
        "um32" => {
            positive = strings(&["CONFIG_UML", "CONFIG_X86", "CONFIG_X86_32", "BITS=32"]);
            negative = strings(&["CONFIG_X86_64", "BITS=64"]);
            keep = &["CONFIG_UML", "CONFIG_X86"];
        }
        other => {
            positive = vec![format!("CONFIG_{}", other.to_uppercase())];
            negative = Vec::new();
            keep = &[];
        }
    }

    let kept: Vec<&str> = if keep.is_empty() {
        positive.iter().map(String::as_str).collect()
    } else {
        keep.to_vec()
    };

    for option in ARCH_DEFINING {
        if !kept.contains(option) {
            negative.push((*option).to_string());
        }
    }

    ArchProfile {
        tag: tag.to_string(),
        positive,
        negative,
    }
}

/// Architectures a compilation unit under `arch/` can belong to.
/// Returns `None` for units outside `arch/`.
pub fn unit_archs(unit: &str) -> Option<Vec<&'static str>> {
    let rest = unit.strip_prefix("arch/")?;
    let subdir = rest.split('/').next().unwrap_or("");

    let tags = match subdir {
        "x86" => vec!["x86_64", "i386"],
        "um" => vec!["um", "um32"],
        "sh" => vec!["sh", "sh64"],
        "sparc" => vec!["sparc", "sparc64"],
        other => match ARCHITECTURES.iter().find(|a| **a == other) {
            Some(tag) => vec![*tag],
            None => Vec::new(),
        },
    };

    Some(tags)
}

/// Subdirectory under `<formulas_root>/kclause/` holding the Kconfig
/// artifacts of an architecture. UML runs on the x86 Kconfig tree.
pub fn kclause_dir(tag: &str) -> &str {
    match tag {
        "um" => "x86_64",
        "um32" => "i386",
        other => other,
    }
}

//
// Private Implementation
//

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}
