pub struct DefaultsConfig {
    pub data_type: String,
    pub model: String,
    pub kappa: f64,
    pub rescaling_scheme: String,
    pub rescaling_frequency: usize,
    pub delay_rescaling: bool,
    pub cycles: u64,
    pub seed: u64,
    pub window: f64,
    pub accept_probability: f64,
    pub tolerance: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_type: "nucleotide".to_string(),
            model: "hky".to_string(),
            kappa: 2.0,
            rescaling_scheme: "default".to_string(),
            rescaling_frequency: 100,
            delay_rescaling: true,
            cycles: 100,
            seed: 1,
            window: 2.0,
            accept_probability: 0.5,
            tolerance: 1e-8,
        }
    }
}
