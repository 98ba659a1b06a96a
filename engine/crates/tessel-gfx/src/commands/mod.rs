pub mod accel;
pub mod barrier;
pub mod descriptor;
pub mod encoder;
pub mod render_pass;
pub mod submit_info;
