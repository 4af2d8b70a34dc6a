pub mod entity;
pub mod envelope;
pub mod event;
pub mod node;
pub mod tree;
pub mod working_copy;

// String-tag newtypes. Tags are registry keys and table-name components, so
// they stay plain strings with ordered comparison.
macro_rules! define_tag {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone,
            Debug,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            serde::Deserialize,
            serde::Serialize,
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(tag: impl Into<String>) -> Self {
                Self(tag.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(tag: &str) -> Self {
                Self::new(tag)
            }
        }
    };
}

pub(crate) use define_tag;
