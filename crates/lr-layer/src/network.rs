//! Ordered composition of layers.

use std::sync::Arc;

use lr_engine::nn::Passthrough;
use lr_tensor::Tensor;
use parking_lot::Mutex;

use crate::error::{LayerError, Result};
use crate::layer::{Layer, LayerCore};

/// A layer that can be registered in several networks.
pub type SharedLayer = Arc<Mutex<dyn Layer>>;

/// Wraps `layer` for registration in a [`Network`].
pub fn shared<L: Layer + 'static>(layer: L) -> SharedLayer {
    Arc::new(Mutex::new(layer))
}

/// A layer that feeds its input through registered child layers in order.
///
/// Initializing a network does not initialize its children; every child
/// must be initialized by its owner before the network runs. A network
/// with no children returns its input unchanged.
#[derive(Debug, Clone, Default)]
pub struct Network {
    core: LayerCore,
    /// Shared with clones made by [`Layer::clone_data`].
    layers: Vec<SharedLayer>,
}

impl Network {
    pub fn new() -> Self {
        Network::default()
    }

    /// Inserts `layer` at `index`, clamped into `[0, len]`, and returns the
    /// position it was inserted at. Out-of-range indices append (or prepend
    /// when negative) instead of failing.
    ///
    /// A child that is locked while the network runs, such as a network
    /// registered inside itself, makes [`Layer::forward`] fail with
    /// [`LayerError::LayerBusy`].
    pub fn register_layer_at(&mut self, layer: SharedLayer, index: i64) -> usize {
        let position = index.clamp(0, self.layers.len() as i64) as usize;
        self.layers.insert(position, layer);
        tracing::debug!(position, count = self.layers.len(), "registered layer");
        position
    }

    /// Appends `layer` and returns its position.
    pub fn register_layer(&mut self, layer: SharedLayer) -> usize {
        let end = self.layers.len() as i64;
        self.register_layer_at(layer, end)
    }

    pub fn layers(&self) -> &[SharedLayer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Layer for Network {
    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    fn kind_name(&self) -> &'static str {
        "Network"
    }

    fn on_initialize_data(&mut self, _retry: bool) -> Result<()> {
        self.core.set_module(Some(Arc::new(Passthrough::new())));
        Ok(())
    }

    fn on_forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let module = self
            .core
            .module()
            .ok_or(LayerError::MissingModule(self.kind_name()))?;
        let data = input.data().ok_or(LayerError::UndefinedInput)?;
        let mut current = Tensor::with_scalar_type(input.declared_scalar_type());
        current.set_data(&module.forward(data)?)?;

        for (index, layer) in self.layers.iter().enumerate() {
            let mut layer = layer.try_lock().ok_or_else(|| {
                tracing::error!(index, "child layer is already locked");
                LayerError::LayerBusy(index)
            })?;
            current = layer.forward(&current).inspect_err(|e| {
                tracing::error!(index, child = layer.kind_name(), error = %e, "child layer failed");
            })?;
        }
        Ok(current)
    }

    fn clone_data(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lr_engine::nn::BatchNormOptions;
    use lr_tensor::ScalarType;

    use crate::norm::BatchNormLayer;

    fn batch_norm(features: i64) -> SharedLayer {
        let mut layer = BatchNormLayer::one_d(BatchNormOptions::new(features));
        layer.initialize_data(false).unwrap();
        shared(layer)
    }

    #[test]
    fn test_register_clamps_index() {
        let mut net = Network::new();
        let a = batch_norm(1);
        let b = batch_norm(2);
        let c = batch_norm(3);
        assert_eq!(net.register_layer_at(a.clone(), 5), 0);
        assert_eq!(net.register_layer_at(b.clone(), -3), 0);
        assert_eq!(net.register_layer_at(c.clone(), 99), 2);
        assert!(Arc::ptr_eq(&net.layers()[0], &b));
        assert!(Arc::ptr_eq(&net.layers()[1], &a));
        assert!(Arc::ptr_eq(&net.layers()[2], &c));
        assert_eq!(net.register_layer(batch_norm(4)), 3);
        assert_eq!(net.len(), 4);
    }

    #[test]
    fn test_empty_network_is_identity() {
        let mut net = Network::new();
        net.initialize_data(false).unwrap();
        let input = Tensor::rand(ScalarType::Float, &[2, 3]).unwrap();
        let output = net.forward(&input).unwrap();
        assert_eq!(output.serialized_values(), input.serialized_values());
    }

    #[test]
    fn test_initialize_does_not_cascade() {
        let mut net = Network::new();
        let child = shared(BatchNormLayer::one_d(BatchNormOptions::new(3)));
        net.register_layer(child.clone());
        net.initialize_data(false).unwrap();
        assert!(!child.lock().is_initialized());

        let input = Tensor::rand(ScalarType::Float, &[4, 3]).unwrap();
        assert!(matches!(
            net.forward(&input),
            Err(LayerError::NotInitialized("BatchNorm1D"))
        ));

        child.lock().initialize_data(false).unwrap();
        assert!(net.forward(&input).is_ok());
    }

    #[test]
    fn test_self_registration_fails_instead_of_blocking() {
        let net = Arc::new(Mutex::new(Network::new()));
        let as_layer: SharedLayer = net.clone();
        net.lock().register_layer(batch_norm(3));
        net.lock().register_layer(as_layer);

        let mut guard = net.lock();
        guard.initialize_data(false).unwrap();
        let input = Tensor::rand(ScalarType::Float, &[4, 3]).unwrap();
        assert!(matches!(guard.forward(&input), Err(LayerError::LayerBusy(1))));
        // break the cycle
        guard.layers.clear();
    }

    #[test]
    fn test_network_has_no_parameters() {
        let mut net = Network::new();
        net.register_layer(batch_norm(2));
        net.initialize_data(false).unwrap();
        assert!(net.parameters().is_empty());
        assert!(net.set_gradient_to_zero(true));
    }
}
