/// Generates a non-exhaustive `#[repr(u8)]` enum mapping Rust variants to the
/// numeric codes reported to callers and to lowercase wire names.
///
/// Produces: enum definition + `as_number()` + `from_number()` + `as_str()` +
/// `Display` + `AsRef<str>` + `FromStr`. The error type must be defined
/// separately (matching crate patterns like `ParseCallStateError`).
///
/// # Example
///
/// ```ignore
/// define_code_enum! {
///     error_type: ParseMyEnumError,
///     /// Doc comment for the enum.
///     pub enum MyEnum {
///         Foo = 0x00 => "foo",
///         Bar = 0x01 => "bar",
///     }
/// }
/// ```
macro_rules! define_code_enum {
    (
        error_type: $Err:ident,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident = $code:literal => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[non_exhaustive]
        #[repr(u8)]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant = $code,
            )+
        }

        impl $Name {
            /// Numeric code.
            pub fn as_number(&self) -> u8 {
                *self as u8
            }

            /// Parse from the numeric code.
            pub fn from_number(n: u8) -> Option<Self> {
                match n {
                    $( $code => Some($Name::$variant), )+
                    _ => None,
                }
            }

            /// Wire-format name string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($wire) {
                        return Ok($Name::$variant);
                    }
                )+
                Err($Err(s.to_string()))
            }
        }
    };
}
