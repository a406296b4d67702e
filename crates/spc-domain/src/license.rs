use serde::Serialize;

const CC0_TEMPLATE: &str = "\
To the extent possible under law, the person who associated CC0 with this
work has waived all copyright and related or neighboring rights to this work.
See <http://creativecommons.org/publicdomain/zero/1.0/>.
";

const BSD_TEMPLATE: &str = "\
Copyright (c) {{ year }}, {{ copyright_holder }}
All rights reserved.

Redistribution and use in source and binary forms, with or without
modification, are permitted provided that the following conditions are met:

1. Redistributions of source code must retain the above copyright notice, this
   list of conditions and the following disclaimer.
2. Redistributions in binary form must reproduce the above copyright notice,
   this list of conditions and the following disclaimer in the documentation
   and/or other materials provided with the distribution.

THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS \"AS IS\"
AND ANY EXPRESS OR IMPLIED WARRANTIES ARE DISCLAIMED.
";

/// License row attached to a revision.
///
/// `text_template` may contain `{{ placeholder }}` fields that are filled in
/// when the license file is written into a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct License {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub text_template: String,
}

impl License {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        description: impl Into<String>,
        text_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            description: description.into(),
            text_template: text_template.into(),
        }
    }

    /// Licenses seeded with a fresh site installation.
    #[must_use]
    pub fn builtin(slug: &str) -> Option<Self> {
        match slug {
            "cc0" => Some(Self::new(
                "CC0",
                "cc0",
                "Creative Commons Zero: public domain dedication",
                CC0_TEMPLATE,
            )),
            "bsd" => Some(Self::new(
                "Simplified BSD",
                "bsd",
                "Two-clause BSD license",
                BSD_TEMPLATE,
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_licenses_are_seeded() {
        let cc0 = License::builtin("cc0").expect("cc0");
        assert_eq!(cc0.slug, "cc0");
        assert!(!cc0.text_template.contains("{{"));

        let bsd = License::builtin("bsd").expect("bsd");
        assert!(bsd.text_template.contains("{{ copyright_holder }}"));
        assert!(License::builtin("gpl").is_none());
    }
}
