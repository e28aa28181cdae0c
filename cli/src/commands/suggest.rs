//! Builder and stack suggestions.

use std::io::Write;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::output;

pub struct SuggestedBuilder {
    pub vendor: &'static str,
    pub image: &'static str,
    pub description: &'static str,
}

/// Builders grouped by vendor. Groups are listed in random order so no
/// vendor is always first; builders within a group keep their order.
pub const SUGGESTED_BUILDERS: &[&[SuggestedBuilder]] = &[
    &[
        SuggestedBuilder {
            vendor: "Cloud Foundry",
            image: "cloudfoundry/cnb:bionic",
            description: "Small base image with Java & Node.js",
        },
        SuggestedBuilder {
            vendor: "Cloud Foundry",
            image: "cloudfoundry/cnb:cflinuxfs3",
            description: "Larger base image with Java, Node.js & Python",
        },
    ],
    &[SuggestedBuilder {
        vendor: "Heroku",
        image: "heroku/buildpacks:18",
        description: "heroku-18 base image with buildpacks for Ruby, Java, Node.js, Python, Golang, & PHP",
    }],
];

pub struct SuggestedStack {
    pub id: &'static str,
    pub description: &'static str,
    pub maintainer: &'static str,
    pub build_image: &'static str,
    pub run_image: &'static str,
}

pub const SUGGESTED_STACKS: &[SuggestedStack] = &[
    SuggestedStack {
        id: "io.buildpacks.stacks.bionic",
        description: "Minimal Ubuntu 18.04 stack",
        maintainer: "Cloud Native Buildpacks",
        build_image: "cnbs/build:bionic",
        run_image: "cnbs/run:bionic",
    },
    SuggestedStack {
        id: "heroku-18",
        description: "The official Heroku stack based on Ubuntu 18.04",
        maintainer: "Heroku",
        build_image: "heroku/pack:18-build",
        run_image: "heroku/pack:18",
    },
    SuggestedStack {
        id: "org.cloudfoundry.stacks.cflinuxfs3",
        description: "The official Cloud Foundry stack based on Ubuntu 18.04",
        maintainer: "Cloud Foundry",
        build_image: "cloudfoundry/build:full-cnb",
        run_image: "cloudfoundry/run:full-cnb",
    },
];

/// Suggested builders in display order, vendor groups shuffled by `rng`.
pub fn builder_order<R: Rng + ?Sized>(rng: &mut R) -> Vec<&'static SuggestedBuilder> {
    let mut groups: Vec<&[SuggestedBuilder]> = SUGGESTED_BUILDERS.to_vec();
    groups.shuffle(rng);
    groups.into_iter().flatten().collect()
}

pub fn suggest_builders<W: Write, R: Rng + ?Sized>(out: &mut W, rng: &mut R) -> std::io::Result<()> {
    writeln!(out, "Suggested builders:")?;
    let mut table = output::new_table(&["VENDOR", "IMAGE", "DESCRIPTION"]);
    for builder in builder_order(rng) {
        table.add_row(vec![builder.vendor, builder.image, builder.description]);
    }
    writeln!(out, "{table}")?;
    writeln!(out)?;
    writeln!(out, "Tip: Learn more about a specific builder with:")?;
    writeln!(out, "\ta3s-pack inspect-builder [builder image]")
}

/// Ask the operator to pick a default builder, then list suggestions.
pub fn suggest_setting_builder<W: Write, R: Rng + ?Sized>(
    out: &mut W,
    rng: &mut R,
) -> std::io::Result<()> {
    writeln!(out, "Please select a default builder with:")?;
    writeln!(out)?;
    writeln!(out, "\ta3s-pack set-default-builder <builder image>")?;
    writeln!(out)?;
    suggest_builders(out, rng)
}

pub fn suggest_stacks<W: Write>(out: &mut W) -> std::io::Result<()> {
    for (index, stack) in SUGGESTED_STACKS.iter().enumerate() {
        if index == 0 {
            writeln!(out, "Stacks maintained by the Cloud Native Buildpacks project:")?;
        } else if index == 1 {
            writeln!(out, "Stacks maintained by the community:")?;
        }
        writeln!(out)?;
        writeln!(out, "    Stack ID: {}", stack.id)?;
        writeln!(out, "    Description: {}", stack.description)?;
        writeln!(out, "    Maintainer: {}", stack.maintainer)?;
        writeln!(out, "    Build Image: {}", stack.build_image)?;
        writeln!(out, "    Run Image: {}", stack.run_image)?;
        writeln!(out)?;
    }
    Ok(())
}
