#[macro_use]
pub mod command_macros {
    /// Use the flag value when given, otherwise prompt for it on stdin.
    #[macro_export]
    macro_rules! arg_input {
        ($op:expr, $query:expr) => {{
            let mut arg = String::new();
            if let Some(value) = $op.as_ref() {
                arg = value.to_string();
            } else {
                println!($query);
                std::io::stdin().read_line(&mut arg)?;
                if let Some('\n') = arg.chars().next_back() {
                    arg.pop();
                }
                if let Some('\r') = arg.chars().next_back() {
                    arg.pop();
                }
            }
            arg
        }};
    }
}
