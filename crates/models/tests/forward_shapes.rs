use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use models::{min_input_side, SceneCapsNet, SceneCapsNetConfig};

type Backend = NdArray<f32>;

#[test]
fn scene_capsnet_outputs_one_capsule_per_class() {
    let device = Default::default();
    let cfg = SceneCapsNetConfig::new(10);
    let model = SceneCapsNet::<Backend>::new(&cfg, &device);

    let input = Tensor::<Backend, 4>::random([2, 1, 40, 51], Distribution::Default, &device);
    let (out, prob) = model.forward(input);
    assert_eq!(out.dims(), [2, 10]);
    assert_eq!(prob.dims(), [2, 10]);

    let lengths = out.into_data().to_vec::<f32>().unwrap();
    assert!(lengths.iter().all(|v| *v >= 0.0 && *v < 1.0 + 1e-3));
    let sums: Vec<f32> = prob.sum_dim(1).into_data().to_vec::<f32>().unwrap();
    for s in sums {
        assert!((s - 1.0).abs() < 1e-4);
    }
}

#[test]
fn small_inputs_still_pool_to_the_grid() {
    let device = Default::default();
    let cfg = SceneCapsNetConfig {
        conv_channels: vec![4],
        primary_maps: 2,
        primary_dim: 4,
        class_dim: 4,
        ..SceneCapsNetConfig::new(3)
    };
    let model = SceneCapsNet::<Backend>::new(&cfg, &device);
    let input = Tensor::<Backend, 4>::zeros([1, 1, 8, 26], &device);
    let (out, _) = model.forward(input);
    assert_eq!(out.dims(), [1, 3]);
}

#[test]
fn minimum_input_shape_follows_the_pooling_depth() {
    assert_eq!(min_input_side(0), 1);
    assert_eq!(min_input_side(3), 8);

    let device = Default::default();
    let cfg = SceneCapsNetConfig::new(2);
    assert_eq!(cfg.min_input_shape(), [4, 4]);
    let model = SceneCapsNet::<Backend>::new(&cfg, &device);
    let input = Tensor::<Backend, 4>::zeros([1, 1, 4, 4], &device);
    let (out, _) = model.forward(input);
    assert_eq!(out.dims(), [1, 2]);
}

#[test]
fn routing_iterations_can_change_between_epochs() {
    let device = Default::default();
    let mut model =
        SceneCapsNet::<Backend>::new(&SceneCapsNetConfig::new(4).with_routing_iterations(3), &device);
    assert_eq!(model.routing_iterations(), 3);
    model.set_routing_iterations(5);
    assert_eq!(model.routing_iterations(), 5);
    model.set_routing_iterations(0);
    assert_eq!(model.routing_iterations(), 1);
}
