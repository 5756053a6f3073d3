mod blend_adam;

pub use blend_adam::BlendAdam;
