//! Terminal output macros.
//!
//! All user-facing printing goes through these so that greppable mode
//! (machine-readable output only) and accessible mode (no colored
//! sigils for screen readers) behave consistently across the binary.

/// Prints a message prefixed with a cyan `[~]` sigil.
///
/// With `greppable` and `accessible` arguments the message is suppressed
/// entirely in greppable mode and printed plain in accessible mode.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::cyan("[~]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", colored::Colorize::bold(colored::Colorize::cyan("[~]")), $name);
            }
        }
    };
}

/// Prints a detail line prefixed with a blue `[>]` sigil.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[>]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[>]")), $name);
            }
        }
    };
}

/// Prints a warning prefixed with a red `[!]` sigil.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        eprintln!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn macros_expand() {
        output!("one arg");
        output!("three args", false, true);
        detail!("detail", false, false);
        warning!("warning", true, false);
    }
}
