//! # envbase_template
//!
//! Infrastructure template composition and publishing.
//!
//! ## Features
//!
//! - Deterministic template document model with intrinsic function helpers
//! - Patterns that add parent resources or register child templates
//! - Child parameter linking against the parent, the network layout and
//!   earlier child outputs
//! - Publishing with an embedded validation hash and optional upload
//!
//! ## Example
//!
//! ```rust
//! use envbase_template::{intrinsic, Output, Resource, Template};
//!
//! let mut template = Template::new("Example");
//! let vpc = template
//!     .add_resource("vpc", Resource::new("AWS::EC2::VPC").property("CidrBlock", "10.0.0.0/16"))
//!     .unwrap();
//! template.add_output("vpcId", Output::new(vpc)).unwrap();
//!
//! assert_eq!(template.to_value()["Outputs"]["vpcId"]["Value"], intrinsic::reference("vpc"));
//! ```

pub mod bootstrap;
pub mod composer;
pub mod document;
pub mod error;
pub mod intrinsic;
pub mod linker;
pub mod pattern;
pub mod patterns;
pub mod publish;

pub use bootstrap::{build_bootstrap, UserData};
pub use composer::{
    check_pattern_order, object_key, object_url, ChildTemplate, ComposedTemplates,
    ComposerSettings, TemplateComposer,
};
pub use document::{validate_template_contents, Output, Parameter, Resource, Template};
pub use error::{TemplateError, TemplateResult};
pub use linker::{Link, LinkSource, ParameterLinker};
pub use pattern::{ChildSpec, CompositionContext, Pattern};
pub use publish::{
    bindings_path, load_bindings, PublishReport, PublishSettings, TemplatePublisher,
};
